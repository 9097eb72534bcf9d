use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::LocalAddress;
use crate::sheet::Boundsheet;

/// Locale-dependent characters queried through `GET.WORKSPACE`-style international settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternationalChar {
    ListSeparator,
    LeftBracket,
    RightBracket,
}

impl InternationalChar {
    /// The character Excel uses when the workbook does not override it.
    pub fn default_char(self) -> char {
        match self {
            InternationalChar::ListSeparator => ',',
            InternationalChar::LeftBracket => '[',
            InternationalChar::RightBracket => ']',
        }
    }
}

/// Answer to a `GET.CELL` style query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellInfo {
    pub data: Option<String>,
    /// The queried cell (or attribute) does not exist in the workbook.
    pub not_exist: bool,
    /// The reader does not know how to answer this info type.
    pub not_implemented: bool,
}

impl CellInfo {
    pub fn found(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn missing() -> Self {
        Self {
            not_exist: true,
            ..Self::default()
        }
    }

    pub fn unsupported() -> Self {
        Self {
            not_implemented: true,
            ..Self::default()
        }
    }
}

/// Read-side contract a workbook reader fulfils for the emulator.
///
/// Container parsing (BIFF8, OOXML, XLSB) lives behind this trait; the emulator only ever sees
/// sheets, names and the handful of environment queries below.
pub trait WorkbookSource {
    fn workbook_name(&self) -> String;

    fn macrosheets(&self) -> Vec<Boundsheet>;

    fn worksheets(&self) -> Vec<Boundsheet>;

    /// Every defined name with its raw stored value.
    fn defined_names(&self) -> BTreeMap<String, String>;

    /// Defined names matching `prefix` (case-insensitively), or exactly equal when `full_match`.
    fn defined_name(&self, prefix: &str, full_match: bool) -> Vec<(String, String)> {
        let prefix = prefix.to_ascii_lowercase();
        self.defined_names()
            .into_iter()
            .filter(|(name, _)| {
                let name = name.to_ascii_lowercase();
                if full_match {
                    name == prefix
                } else {
                    name.starts_with(&prefix)
                }
            })
            .collect()
    }

    fn cell_info(&self, sheet: &str, address: LocalAddress, info_type: u32) -> CellInfo;

    fn international_char(&self, which: InternationalChar) -> char {
        which.default_char()
    }
}
