use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::address::LocalAddress;
use crate::sheet::SheetId;

/// Sheet-qualified identity of a cell inside a loaded [`crate::Workbook`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CellLocation {
    pub sheet: SheetId,
    pub address: LocalAddress,
}

impl CellLocation {
    #[inline]
    pub const fn new(sheet: SheetId, address: LocalAddress) -> Self {
        Self { sheet, address }
    }

    /// The location directly below this one on the same sheet.
    #[inline]
    pub const fn below(self) -> Self {
        Self {
            sheet: self.sheet,
            address: self.address.below(),
        }
    }
}

/// One grid cell.
///
/// `formula` keeps the leading `=`. `value` is the cached rendered value, which the
/// emulator overwrites as it evaluates.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Cell {
    pub address: LocalAddress,
    pub formula: Option<String>,
    pub value: Option<String>,
    /// Formatting/style facts exposed through `GET.CELL` (keys are the info type ids).
    pub attributes: BTreeMap<String, String>,
    /// Number of times the driver evaluated this cell as a trace step.
    pub visits: u32,
}

impl Cell {
    pub fn new(address: LocalAddress) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// True when the cell holds a formula whose cached value is stale or missing.
    pub fn needs_evaluation(&self) -> bool {
        match &self.formula {
            Some(formula) => self.value.as_deref() != Some(formula.as_str()),
            None => false,
        }
    }
}

/// Cells of one sheet keyed by position.
pub type CellMap = HashMap<LocalAddress, Cell>;
