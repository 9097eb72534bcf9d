//! Workbook model for the XLM macro emulator.
//!
//! This crate holds the mutable cell grid (sheets of [`Cell`]s plus defined names), the address
//! helpers shared by the parser and the evaluator, and the [`WorkbookSource`] trait that
//! container readers implement.

#![forbid(unsafe_code)]

pub mod address;
pub mod cell;
pub mod fixture;
pub mod sheet;
pub mod source;
pub mod workbook;

pub use address::{
    column_index, column_name, parse_cell_address, parse_range_address, quote_sheet_name,
    relative_offset, AddressError, CellAddress, LocalAddress, RangeAddress, MAX_COLUMN, MAX_ROW,
};
pub use cell::{Cell, CellLocation, CellMap};
pub use fixture::{FixtureError, FixtureSheet, FixtureWorkbook};
pub use sheet::{Boundsheet, SheetId, SheetKind};
pub use source::{CellInfo, InternationalChar, WorkbookSource};
pub use workbook::{DefinedNames, NameValue, Workbook};
