use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::LocalAddress;
use crate::cell::{Cell, CellMap};

/// Index of a sheet inside its workbook. Ids are only minted by [`crate::Workbook::add_sheet`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetKind {
    Worksheet,
    Macrosheet,
}

/// A named sheet of cells ("boundsheet" in BIFF terms).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Boundsheet {
    pub name: String,
    pub kind: SheetKind,
    pub cells: CellMap,
    /// Explicit row heights keyed by 1-based row.
    pub row_heights: BTreeMap<u32, String>,
    pub default_height: Option<String>,
}

impl Boundsheet {
    pub fn new(name: impl Into<String>, kind: SheetKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cells: CellMap::new(),
            row_heights: BTreeMap::new(),
            default_height: None,
        }
    }

    pub fn is_macrosheet(&self) -> bool {
        self.kind == SheetKind::Macrosheet
    }

    pub fn add_cell(&mut self, cell: Cell) {
        self.cells.insert(cell.address, cell);
    }

    pub fn cell(&self, address: LocalAddress) -> Option<&Cell> {
        self.cells.get(&address)
    }

    pub fn cell_mut(&mut self, address: LocalAddress) -> Option<&mut Cell> {
        self.cells.get_mut(&address)
    }

    /// Fetch a cell, creating an empty one if the position was never populated.
    pub fn cell_entry(&mut self, address: LocalAddress) -> &mut Cell {
        self.cells
            .entry(address)
            .or_insert_with(|| Cell::new(address))
    }

    /// First cell holding a formula at `start` or below it in the same column, looking at
    /// most `limit` rows further down.
    pub fn formula_cell_at_or_below(&self, start: LocalAddress, limit: u32) -> Option<LocalAddress> {
        let last = start.row.saturating_add(limit);
        (start.row..=last)
            .map(|row| LocalAddress::new(start.col, row))
            .find(|addr| self.cells.get(addr).is_some_and(|c| c.formula.is_some()))
    }

    /// Populated cells inside the rectangle spanned by `a` and `b`, row-major.
    ///
    /// Cost follows the number of populated cells, not the size of the rectangle.
    pub fn cells_in_range(&self, a: LocalAddress, b: LocalAddress) -> Vec<&Cell> {
        let (r0, r1) = (a.row.min(b.row), a.row.max(b.row));
        let (c0, c1) = (a.col.min(b.col), a.col.max(b.col));
        let mut cells: Vec<&Cell> = self
            .cells
            .values()
            .filter(|c| (r0..=r1).contains(&c.address.row) && (c0..=c1).contains(&c.address.col))
            .collect();
        cells.sort_by_key(|c| (c.address.row, c.address.col));
        cells
    }

    /// Cells sorted row-major, for deterministic output.
    pub fn sorted_cells(&self) -> Vec<&Cell> {
        let mut cells: Vec<&Cell> = self.cells.values().collect();
        cells.sort_by_key(|c| (c.address.row, c.address.col));
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_next_formula_cell_within_limit() {
        let mut sheet = Boundsheet::new("Macro1", SheetKind::Macrosheet);
        sheet.add_cell(Cell::new(LocalAddress::new(1, 1)).with_value("x"));
        sheet.add_cell(Cell::new(LocalAddress::new(1, 5)).with_formula("=HALT()"));

        assert_eq!(
            sheet.formula_cell_at_or_below(LocalAddress::new(1, 1), 10),
            Some(LocalAddress::new(1, 5))
        );
        assert_eq!(sheet.formula_cell_at_or_below(LocalAddress::new(1, 1), 3), None);
        assert_eq!(sheet.formula_cell_at_or_below(LocalAddress::new(2, 1), 10), None);
    }

    #[test]
    fn range_lookup_only_sees_populated_cells() {
        let mut sheet = Boundsheet::new("Macro1", SheetKind::Macrosheet);
        sheet.add_cell(Cell::new(LocalAddress::new(3, 2)).with_value("c2"));
        sheet.add_cell(Cell::new(LocalAddress::new(2, 9)).with_value("b9"));
        sheet.add_cell(Cell::new(LocalAddress::new(5, 1)).with_value("e1"));

        let found: Vec<String> = sheet
            .cells_in_range(LocalAddress::new(16_384, 1_048_576), LocalAddress::new(2, 1))
            .iter()
            .map(|c| c.address.to_a1())
            .collect();
        assert_eq!(found, vec!["E1", "C2", "B9"]);
    }
}
