use core::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest column index addressable in a sheet (`XFD`).
pub const MAX_COLUMN: u32 = 16_384;
/// Largest row index addressable in a sheet.
pub const MAX_ROW: u32 = 1_048_576;

/// A cell position within one sheet.
///
/// Rows and columns are **1-indexed**, the way they are written in A1 notation:
/// - `row = 1` is Excel row `1`
/// - `col = 1` is Excel column `A`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalAddress {
    pub col: u32,
    pub row: u32,
}

impl LocalAddress {
    #[inline]
    pub const fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    /// Convert to Excel A1 notation (e.g. `A1`, `BC32`).
    pub fn to_a1(self) -> String {
        format!("{}{}", column_name(self.col), self.row)
    }

    /// Parse an A1-style reference (e.g. `A1`, `$B$2`). No sheet prefix is accepted.
    pub fn from_a1(a1: &str) -> Result<Self, AddressError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let bytes = s.as_bytes();
        let mut idx = 0usize;
        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(AddressError::MissingColumn(s.to_string()));
        }
        let col = column_index(&s[col_start..idx])?;

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start || idx != bytes.len() {
            return Err(AddressError::InvalidRow(s.to_string()));
        }
        let row = parse_row(&s[row_start..idx])?;
        Ok(Self { col, row })
    }

    /// The cell directly below this one.
    #[inline]
    pub const fn below(self) -> Self {
        Self {
            col: self.col,
            row: self.row + 1,
        }
    }

    /// Shift by a signed row/column delta. Returns `None` when the result leaves the grid.
    pub fn offset(self, rows: i64, cols: i64) -> Option<Self> {
        let row = i64::from(self.row) + rows;
        let col = i64::from(self.col) + cols;
        if !(1..=i64::from(MAX_ROW)).contains(&row) || !(1..=i64::from(MAX_COLUMN)).contains(&col)
        {
            return None;
        }
        Some(Self {
            col: col as u32,
            row: row as u32,
        })
    }
}

impl Default for LocalAddress {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// A cell address as written in formula text, optionally qualified by a sheet name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub sheet: Option<String>,
    pub local: LocalAddress,
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", quote_sheet_name(sheet))?;
        }
        write!(f, "{}", self.local)
    }
}

/// An inclusive rectangular block of cells on one sheet.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RangeAddress {
    pub sheet: Option<String>,
    pub start: LocalAddress,
    pub end: LocalAddress,
}

impl RangeAddress {
    /// Number of rows covered by the range.
    pub fn height(&self) -> u32 {
        self.end.row.abs_diff(self.start.row) + 1
    }

    /// Row-major iteration over every position in the range.
    pub fn positions(&self) -> impl Iterator<Item = LocalAddress> + '_ {
        let (r0, r1) = (self.start.row.min(self.end.row), self.start.row.max(self.end.row));
        let (c0, c1) = (self.start.col.min(self.end.col), self.start.col.max(self.end.col));
        (r0..=r1).flat_map(move |row| (c0..=c1).map(move |col| LocalAddress::new(col, row)))
    }
}

impl fmt::Display for RangeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", quote_sheet_name(sheet))?;
        }
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Errors produced while decoding cell addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty cell reference")]
    Empty,
    #[error("missing column in `{0}`")]
    MissingColumn(String),
    #[error("invalid column `{0}`")]
    InvalidColumn(String),
    #[error("invalid row in `{0}`")]
    InvalidRow(String),
}

/// Convert a column name (`A`, `AB`, `XFD`) to its 1-based index.
///
/// Column names are bijective base-26: `Z` is 26 and `AA` is 27.
pub fn column_index(name: &str) -> Result<u32, AddressError> {
    let mut col: u32 = 0;
    for b in name.bytes() {
        if !b.is_ascii_alphabetic() {
            return Err(AddressError::InvalidColumn(name.to_string()));
        }
        let v = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(v))
            .filter(|c| *c <= MAX_COLUMN)
            .ok_or_else(|| AddressError::InvalidColumn(name.to_string()))?;
    }
    if col == 0 {
        return Err(AddressError::InvalidColumn(name.to_string()));
    }
    Ok(col)
}

/// Convert a 1-based column index to its name. Index `0` has no name and yields an empty string.
pub fn column_name(index: u32) -> String {
    let mut n = index;
    let mut out = Vec::<u8>::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

fn parse_row(digits: &str) -> Result<u32, AddressError> {
    let row: u32 = digits
        .parse()
        .map_err(|_| AddressError::InvalidRow(digits.to_string()))?;
    if row == 0 || row > MAX_ROW {
        return Err(AddressError::InvalidRow(digits.to_string()));
    }
    Ok(row)
}

/// Quote a sheet name for use in a reference when it is not a plain identifier.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

fn unquote_sheet_name(raw: &str) -> String {
    match raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => raw.to_string(),
    }
}

const SHEET_PATTERN: &str = r"(?:'(?:[^']|'')+'|[^\s!'$:]+?)";

fn a1_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"^(?:(?P<sheet>{SHEET_PATTERN})!)?\$?(?P<col>[A-Za-z]+)\$?(?P<row>\d+)");
        Regex::new(&pattern).expect("static A1 pattern compiles")
    })
}

fn r1c1_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"^(?:(?P<sheet>{SHEET_PATTERN})!)?[Rr](?P<row>\d+)[Cc](?P<col>\d+)");
        Regex::new(&pattern).expect("static R1C1 pattern compiles")
    })
}

fn range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"^(?:(?P<sheet>{SHEET_PATTERN})[!$])?\$?(?P<c1>[A-Za-z]+)\$?(?P<r1>\d+)(?::\$?(?P<c2>[A-Za-z]+)\$?(?P<r2>\d+))?$"
        );
        Regex::new(&pattern).expect("static range pattern compiles")
    })
}

fn relative_offset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[Rr](?:\[?(?P<row>[+-]?\d+)\]?)?[Cc](?:\[?(?P<col>[+-]?\d+)\]?)?$")
            .expect("static offset pattern compiles")
    })
}

/// Parse a textual cell address such as `Macro1!$A$1`, `'My Sheet'!B2` or `R3C4`.
///
/// Absolute R1C1 is tried first, then A1. Only a prefix of the text has to match, so
/// `Sheet1!A1:B2` decodes to its first cell.
pub fn parse_cell_address(text: &str) -> Option<CellAddress> {
    let text = text.trim().trim_start_matches('=');
    if let Some(caps) = r1c1_regex().captures(text) {
        let row = parse_row(&caps["row"]).ok()?;
        let col: u32 = caps["col"].parse().ok()?;
        if (1..=MAX_COLUMN).contains(&col) {
            return Some(CellAddress {
                sheet: caps.name("sheet").map(|m| unquote_sheet_name(m.as_str())),
                local: LocalAddress::new(col, row),
            });
        }
    }
    let caps = a1_regex().captures(text)?;
    let col = column_index(&caps["col"]).ok()?;
    let row = parse_row(&caps["row"]).ok()?;
    Some(CellAddress {
        sheet: caps.name("sheet").map(|m| unquote_sheet_name(m.as_str())),
        local: LocalAddress::new(col, row),
    })
}

/// Parse a textual range such as `Sheet1!A1:B10`. A single cell decodes to a 1x1 range.
pub fn parse_range_address(text: &str) -> Option<RangeAddress> {
    let text = text.trim().trim_start_matches('=');
    let caps = range_regex().captures(text)?;
    let start = LocalAddress::new(column_index(&caps["c1"]).ok()?, parse_row(&caps["r1"]).ok()?);
    let end = match (caps.name("c2"), caps.name("r2")) {
        (Some(c2), Some(r2)) => LocalAddress::new(
            column_index(c2.as_str()).ok()?,
            parse_row(r2.as_str()).ok()?,
        ),
        _ => start,
    };
    Some(RangeAddress {
        sheet: caps.name("sheet").map(|m| unquote_sheet_name(m.as_str())),
        start,
        end,
    })
}

/// Apply an R1C1 offset (`R[1]C[-2]`, `RC[3]`) to a base address and return the
/// absolute A1 text, keeping the base's sheet qualifier.
pub fn relative_offset(base: &str, offset: &str) -> Option<String> {
    let base = parse_cell_address(base)?;
    let caps = relative_offset_regex().captures(offset.trim())?;
    let delta = |name: &str| -> Option<i64> {
        caps.name(name).map_or(Some(0), |m| m.as_str().trim_start_matches('+').parse().ok())
    };
    let local = base.local.offset(delta("row")?, delta("col")?)?;
    Some(
        CellAddress {
            sheet: base.sheet,
            local,
        }
        .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn column_names_are_bijective_base_26() {
        assert_eq!(column_name(1), "A");
        assert_eq!(column_name(26), "Z");
        assert_eq!(column_name(27), "AA");
        assert_eq!(column_name(702), "ZZ");
        assert_eq!(column_name(703), "AAA");
        assert_eq!(column_name(0), "");
        assert_eq!(column_index("xfd").unwrap(), MAX_COLUMN);
        assert!(column_index("XFE").is_err());
        assert!(column_index("A1").is_err());
    }

    #[test]
    fn parses_a1_with_absolute_markers() {
        assert_eq!(LocalAddress::from_a1("$B$12").unwrap(), LocalAddress::new(2, 12));
        assert_eq!(LocalAddress::from_a1("c3").unwrap().to_a1(), "C3");
        assert_eq!(LocalAddress::from_a1(""), Err(AddressError::Empty));
        assert!(LocalAddress::from_a1("A0").is_err());
        assert!(LocalAddress::from_a1("A1B").is_err());
    }

    #[test]
    fn parses_sheet_qualified_addresses() {
        let addr = parse_cell_address("Macro1!$A$1").unwrap();
        assert_eq!(addr.sheet.as_deref(), Some("Macro1"));
        assert_eq!(addr.local, LocalAddress::new(1, 1));

        let quoted = parse_cell_address("'My ''Sheet'''!C4").unwrap();
        assert_eq!(quoted.sheet.as_deref(), Some("My 'Sheet'"));
        assert_eq!(quoted.to_string(), "'My ''Sheet'''!C4");

        let r1c1 = parse_cell_address("R3C4").unwrap();
        assert_eq!(r1c1.local, LocalAddress::new(4, 3));
        assert_eq!(r1c1.sheet, None);

        assert_eq!(parse_cell_address("hello world"), None);
    }

    #[test]
    fn parses_ranges() {
        let range = parse_range_address("Sheet1!A1:B3").unwrap();
        assert_eq!(range.sheet.as_deref(), Some("Sheet1"));
        assert_eq!(range.height(), 3);
        assert_eq!(range.positions().count(), 6);
        assert_eq!(
            range.positions().nth(1).unwrap(),
            LocalAddress::new(2, 1),
            "iteration is row-major"
        );

        let single = parse_range_address("$C$5").unwrap();
        assert_eq!(single.start, single.end);
    }

    #[test]
    fn applies_relative_offsets() {
        assert_eq!(relative_offset("Macro1!B2", "R[1]C[-1]").as_deref(), Some("Macro1!A3"));
        assert_eq!(relative_offset("B2", "RC[2]").as_deref(), Some("D2"));
        assert_eq!(relative_offset("A1", "R[-1]C"), None);
    }

    proptest! {
        #[test]
        fn prop_column_name_round_trips(index in 1u32..=MAX_COLUMN) {
            let name = column_name(index);
            prop_assert_eq!(column_index(&name).unwrap(), index);
        }
    }
}
