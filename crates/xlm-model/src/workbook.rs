use std::collections::BTreeMap;

use serde::Serialize;

use crate::address::{parse_cell_address, LocalAddress};
use crate::cell::{Cell, CellLocation};
use crate::sheet::{Boundsheet, SheetId, SheetKind};
use crate::source::WorkbookSource;

/// The value bound to a defined name.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum NameValue {
    /// Raw text as stored in the workbook or produced by `SET.NAME`. May itself be formula text.
    Text(String),
    Number(f64),
    /// A resolved cell reference.
    Reference { sheet: String, address: LocalAddress },
    List(Vec<String>),
}

impl NameValue {
    /// Interpret the binding as a cell address when it is one (directly or textually).
    pub fn as_reference(&self) -> Option<(Option<String>, LocalAddress)> {
        match self {
            NameValue::Reference { sheet, address } => Some((Some(sheet.clone()), *address)),
            NameValue::Text(text) => parse_cell_address(text).map(|a| (a.sheet, a.local)),
            NameValue::Number(_) | NameValue::List(_) => None,
        }
    }
}

impl std::fmt::Display for NameValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameValue::Text(text) => f.write_str(text),
            NameValue::Number(n) => write!(f, "{n}"),
            NameValue::Reference { sheet, address } => {
                write!(f, "{}!{address}", crate::address::quote_sheet_name(sheet))
            }
            NameValue::List(items) => write!(f, "{{{}}}", items.join(",")),
        }
    }
}

/// Case-insensitive table of defined names.
///
/// Keys are stored lowercased; `_xlnm.` prefixes on built-in names are stripped on insert.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DefinedNames {
    entries: BTreeMap<String, NameValue>,
}

impl DefinedNames {
    pub fn normalize(name: &str) -> String {
        let lower = name.trim().to_ascii_lowercase();
        match lower.strip_prefix("_xlnm.") {
            Some(rest) => rest.to_string(),
            None => lower,
        }
    }

    pub fn insert(&mut self, name: &str, value: NameValue) {
        self.entries.insert(Self::normalize(name), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<NameValue> {
        self.entries.remove(&Self::normalize(name))
    }

    pub fn get(&self, name: &str) -> Option<&NameValue> {
        self.entries.get(&Self::normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&Self::normalize(name))
    }

    /// Names equal to `prefix`, or starting with it when `full_match` is false.
    pub fn matching(&self, prefix: &str, full_match: bool) -> Vec<(&str, &NameValue)> {
        let prefix = Self::normalize(prefix);
        self.entries
            .iter()
            .filter(|(name, _)| {
                if full_match {
                    **name == prefix
                } else {
                    name.starts_with(&prefix)
                }
            })
            .map(|(name, value)| (name.as_str(), value))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NameValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory workbook the emulator mutates while it runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Workbook {
    name: String,
    sheets: Vec<Boundsheet>,
    names: DefinedNames,
}

impl Workbook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Snapshot everything a [`WorkbookSource`] exposes. Macrosheets come first.
    pub fn load(source: &dyn WorkbookSource) -> Self {
        let mut workbook = Workbook::new(source.workbook_name());
        for sheet in source.macrosheets().into_iter().chain(source.worksheets()) {
            workbook.add_sheet(sheet);
        }
        for (name, raw) in source.defined_names() {
            workbook.names.insert(&name, NameValue::Text(raw));
        }
        log::debug!(
            "loaded workbook {:?}: {} sheets, {} defined names",
            workbook.name,
            workbook.sheets.len(),
            workbook.names.len()
        );
        workbook
    }

    pub fn add_sheet(&mut self, sheet: Boundsheet) -> SheetId {
        self.sheets.push(sheet);
        SheetId(self.sheets.len() - 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sheet(&self, id: SheetId) -> &Boundsheet {
        &self.sheets[id.0]
    }

    pub fn sheet_mut(&mut self, id: SheetId) -> &mut Boundsheet {
        &mut self.sheets[id.0]
    }

    /// Find a sheet by name; exact match wins over a case-insensitive one.
    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        let name = name.trim_matches('\'');
        self.sheets
            .iter()
            .position(|s| s.name == name)
            .or_else(|| {
                self.sheets
                    .iter()
                    .position(|s| s.name.eq_ignore_ascii_case(name))
            })
            .map(SheetId)
    }

    pub fn sheets(&self) -> impl Iterator<Item = (SheetId, &Boundsheet)> {
        self.sheets.iter().enumerate().map(|(i, s)| (SheetId(i), s))
    }

    pub fn macrosheets(&self) -> impl Iterator<Item = (SheetId, &Boundsheet)> {
        self.sheets().filter(|(_, s)| s.kind == SheetKind::Macrosheet)
    }

    pub fn cell(&self, loc: CellLocation) -> Option<&Cell> {
        self.sheets.get(loc.sheet.0)?.cell(loc.address)
    }

    pub fn cell_mut(&mut self, loc: CellLocation) -> Option<&mut Cell> {
        self.sheets.get_mut(loc.sheet.0)?.cell_mut(loc.address)
    }

    pub fn cell_entry(&mut self, loc: CellLocation) -> &mut Cell {
        self.sheet_mut(loc.sheet).cell_entry(loc.address)
    }

    pub fn names(&self) -> &DefinedNames {
        &self.names
    }

    pub fn names_mut(&mut self) -> &mut DefinedNames {
        &mut self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defined_names_are_case_insensitive_and_strip_builtin_prefix() {
        let mut names = DefinedNames::default();
        names.insert("_xlnm.Auto_Open", NameValue::Text("Macro1!$A$1".into()));
        names.insert("Auto_Open21", NameValue::Text("Macro1!$B$1".into()));
        names.insert("payload", NameValue::Number(3.0));

        assert!(names.contains("AUTO_OPEN"));
        assert_eq!(names.matching("auto_open", false).len(), 2);
        assert_eq!(names.matching("auto_open", true).len(), 1);

        let (sheet, address) = names.get("auto_open").unwrap().as_reference().unwrap();
        assert_eq!(sheet.as_deref(), Some("Macro1"));
        assert_eq!(address, LocalAddress::new(1, 1));
        assert_eq!(names.get("payload").unwrap().as_reference(), None);
    }

    #[test]
    fn sheet_lookup_prefers_exact_name() {
        let mut wb = Workbook::new("book.xlsm");
        let lower = wb.add_sheet(Boundsheet::new("macro", SheetKind::Macrosheet));
        let upper = wb.add_sheet(Boundsheet::new("MACRO", SheetKind::Worksheet));

        assert_eq!(wb.sheet_id("MACRO"), Some(upper));
        assert_eq!(wb.sheet_id("macro"), Some(lower));
        assert_eq!(wb.sheet_id("'Macro'"), Some(lower));
        assert_eq!(wb.sheet_id("Sheet9"), None);
        assert_eq!(wb.macrosheets().count(), 1);
    }
}
