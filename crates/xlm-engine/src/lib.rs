#![forbid(unsafe_code)]

//! Symbolic emulation of Excel 4.0 (XLM) macros.
//!
//! An [`Emulator`] walks a workbook's macrosheets from their `auto_open`/`auto_close` entry
//! points, evaluating each formula against an owned copy of the cell grid. Every step is
//! reported as a [`TraceStep`]: the cell, how completely the formula could be resolved
//! ([`EvalStatus`]), and its deobfuscated text.
//!
//! The emulator never executes anything. Native calls, file writes and memory writes are
//! recorded in side channels ([`Emulator::memory`], [`Emulator::files`]) so droppers can be
//! inspected after the run. Conditions that cannot be resolved statically fork the walk and
//! both outcomes are explored, each against its own snapshot of the sheet.
//!
//! ```no_run
//! use xlm_engine::{Emulator, EmulatorConfig};
//! use xlm_model::{FixtureSheet, FixtureWorkbook};
//!
//! let fixture = FixtureWorkbook::new("dropper.xlsm")
//!     .sheet(FixtureSheet::macrosheet("Macro1").formula("A1", "=HALT()"))
//!     .defined_name("auto_open", "Macro1!$A$1");
//! let mut emulator = Emulator::new(&fixture).with_config(EmulatorConfig::default());
//! for step in emulator.deobfuscate() {
//!     println!("{}!{} {}", step.sheet, step.address, step.text);
//! }
//! ```

pub mod config;
mod driver;
mod emulator;
pub mod error;
mod eval;
mod functions;
pub mod oracle;
pub mod parser;
pub mod side_channel;
pub mod value;

pub use config::EmulatorConfig;
pub use driver::{Deobfuscation, TraceStep};
pub use emulator::Emulator;
pub use error::EngineError;
pub use oracle::{InteractiveShell, UnknownValueRequest};
pub use parser::{parse_formula, Expr, ParseError, XlmSyntax};
pub use side_channel::{MemoryRegion, VirtualFile};
pub use value::{EvalResult, EvalStatus, XlValue};
