//! JSON workbook fixtures.
//!
//! A fixture is the in-memory stand-in for a container reader: it lists sheets, cells and
//! defined names directly, and answers `GET.CELL` queries from per-cell attribute maps.
//!
//! ```json
//! {
//!   "name": "sample.xlsm",
//!   "sheets": [
//!     {
//!       "name": "Macro1",
//!       "kind": "macrosheet",
//!       "cells": { "A1": { "formula": "=HALT()" } },
//!       "rowHeights": { "1": "15" }
//!     }
//!   ],
//!   "definedNames": { "auto_open": "Macro1!$A$1" }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{AddressError, LocalAddress};
use crate::cell::Cell;
use crate::sheet::{Boundsheet, SheetKind};
use crate::source::{CellInfo, InternationalChar, WorkbookSource};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("invalid fixture JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sheet `{sheet}` has an invalid cell key: {source}")]
    CellKey {
        sheet: String,
        #[source]
        source: AddressError,
    },
    #[error("duplicate sheet name `{0}`")]
    DuplicateSheet(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// `GET.CELL` answers keyed by info type (`"19"` is font size, `"24"` font color, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSheet {
    pub name: String,
    pub kind: SheetKind,
    #[serde(default)]
    pub cells: BTreeMap<String, FixtureCell>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub row_heights: BTreeMap<u32, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_height: Option<String>,
}

impl FixtureSheet {
    pub fn new(name: impl Into<String>, kind: SheetKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cells: BTreeMap::new(),
            row_heights: BTreeMap::new(),
            default_height: None,
        }
    }

    pub fn macrosheet(name: impl Into<String>) -> Self {
        Self::new(name, SheetKind::Macrosheet)
    }

    pub fn worksheet(name: impl Into<String>) -> Self {
        Self::new(name, SheetKind::Worksheet)
    }

    pub fn formula(mut self, address: &str, formula: impl Into<String>) -> Self {
        self.cells.entry(address.to_string()).or_default().formula = Some(formula.into());
        self
    }

    pub fn value(mut self, address: &str, value: impl Into<String>) -> Self {
        self.cells.entry(address.to_string()).or_default().value = Some(value.into());
        self
    }

    pub fn attribute(mut self, address: &str, info_type: u32, data: impl Into<String>) -> Self {
        self.cells
            .entry(address.to_string())
            .or_default()
            .attributes
            .insert(info_type.to_string(), data.into());
        self
    }

    fn to_boundsheet(&self) -> Boundsheet {
        let mut sheet = Boundsheet::new(self.name.clone(), self.kind);
        for (key, fixture) in &self.cells {
            let Ok(address) = LocalAddress::from_a1(key) else {
                log::warn!("skipping cell `{key}` on sheet `{}`", self.name);
                continue;
            };
            sheet.add_cell(Cell {
                address,
                formula: fixture.formula.clone(),
                value: fixture.value.clone(),
                attributes: fixture.attributes.clone(),
                visits: 0,
            });
        }
        sheet.row_heights = self.row_heights.clone();
        sheet.default_height = self.default_height.clone();
        sheet
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureInternational {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_separator: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_bracket: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_bracket: Option<char>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureWorkbook {
    pub name: String,
    #[serde(default)]
    pub sheets: Vec<FixtureSheet>,
    #[serde(default)]
    pub defined_names: BTreeMap<String, String>,
    #[serde(default)]
    pub international: FixtureInternational,
}

impl FixtureWorkbook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn sheet(mut self, sheet: FixtureSheet) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn defined_name(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defined_names.insert(name.into(), value.into());
        self
    }

    pub fn from_json(text: &str) -> Result<Self, FixtureError> {
        let fixture: FixtureWorkbook = serde_json::from_str(text)?;
        fixture.validate()?;
        Ok(fixture)
    }

    /// Reject duplicate sheet names and cell keys that are not A1 addresses.
    pub fn validate(&self) -> Result<(), FixtureError> {
        let mut seen = std::collections::HashSet::new();
        for sheet in &self.sheets {
            if !seen.insert(sheet.name.to_ascii_lowercase()) {
                return Err(FixtureError::DuplicateSheet(sheet.name.clone()));
            }
            for key in sheet.cells.keys() {
                LocalAddress::from_a1(key).map_err(|source| FixtureError::CellKey {
                    sheet: sheet.name.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    fn find_sheet(&self, name: &str) -> Option<&FixtureSheet> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .or_else(|| self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name)))
    }

    fn sheets_of(&self, kind: SheetKind) -> Vec<Boundsheet> {
        self.sheets
            .iter()
            .filter(|s| s.kind == kind)
            .map(FixtureSheet::to_boundsheet)
            .collect()
    }
}

/// Info types answered from per-cell attributes.
const ATTRIBUTE_TYPES: &[u32] = &[8, 19, 20, 21, 23, 24, 38, 50];

impl WorkbookSource for FixtureWorkbook {
    fn workbook_name(&self) -> String {
        self.name.clone()
    }

    fn macrosheets(&self) -> Vec<Boundsheet> {
        self.sheets_of(SheetKind::Macrosheet)
    }

    fn worksheets(&self) -> Vec<Boundsheet> {
        self.sheets_of(SheetKind::Worksheet)
    }

    fn defined_names(&self) -> BTreeMap<String, String> {
        self.defined_names.clone()
    }

    fn cell_info(&self, sheet: &str, address: LocalAddress, info_type: u32) -> CellInfo {
        let Some(fixture) = self.find_sheet(sheet) else {
            return CellInfo::missing();
        };
        match info_type {
            2 => CellInfo::found(address.row.to_string()),
            3 => CellInfo::found(address.col.to_string()),
            17 => fixture
                .row_heights
                .get(&address.row)
                .or(fixture.default_height.as_ref())
                .map_or_else(CellInfo::missing, CellInfo::found),
            t if ATTRIBUTE_TYPES.contains(&t) => fixture
                .cells
                .iter()
                .find(|(key, _)| LocalAddress::from_a1(key).ok() == Some(address))
                .and_then(|(_, cell)| cell.attributes.get(&t.to_string()))
                .map_or_else(CellInfo::missing, CellInfo::found),
            _ => CellInfo::unsupported(),
        }
    }

    fn international_char(&self, which: InternationalChar) -> char {
        let configured = match which {
            InternationalChar::ListSeparator => self.international.list_separator,
            InternationalChar::LeftBracket => self.international.left_bracket,
            InternationalChar::RightBracket => self.international.right_bracket,
        };
        configured.unwrap_or_else(|| which.default_char())
    }
}
