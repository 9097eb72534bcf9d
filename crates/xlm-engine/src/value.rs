//! Runtime values and evaluation results.

use std::fmt;

use serde::Serialize;
use xlm_model::{quote_sheet_name, CellLocation, LocalAddress};

/// A value produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum XlValue {
    /// No value could be determined (the counterpart of an unresolved result).
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Reference { sheet: String, address: LocalAddress },
    List(Vec<XlValue>),
}

impl XlValue {
    pub fn text(s: impl Into<String>) -> Self {
        XlValue::Text(s.into())
    }

    /// Decode a cached cell value: numeric text becomes a number, everything else stays text.
    pub fn from_cell_text(raw: &str) -> Self {
        match parse_number(raw) {
            Some(n) => XlValue::Number(n),
            None => XlValue::Text(raw.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, XlValue::Empty)
    }

    /// Numeric view: numbers, booleans, numeric or `TRUE`/`FALSE` text, and `Empty` (as zero).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            XlValue::Number(n) => Some(*n),
            XlValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            XlValue::Empty => Some(0.0),
            XlValue::Text(s) => {
                let s = unwrap_str_literal(s.trim());
                if s.eq_ignore_ascii_case("true") {
                    Some(1.0)
                } else if s.eq_ignore_ascii_case("false") {
                    Some(0.0)
                } else {
                    parse_number(&s)
                }
            }
            XlValue::Reference { .. } | XlValue::List(_) => None,
        }
    }

    /// Integer view used by handlers that take counts, codes and addresses.
    pub fn as_integer(&self) -> Option<i64> {
        let n = self.as_number()?;
        (n.is_finite() && n.fract() == 0.0).then_some(n as i64)
    }

    /// Condition semantics: boolean-ish strings and numbers map to their truth value; other
    /// non-empty text is truthy.
    pub fn truthiness(&self) -> bool {
        match self {
            XlValue::Empty => false,
            XlValue::Bool(b) => *b,
            XlValue::Number(n) => *n != 0.0,
            XlValue::Text(s) => {
                let s = unwrap_str_literal(s.trim()).to_ascii_lowercase();
                match s.as_str() {
                    "y" | "yes" | "t" | "true" | "on" => true,
                    "n" | "no" | "f" | "false" | "off" | "" => false,
                    other => parse_number(other).map_or(true, |n| n != 0.0),
                }
            }
            XlValue::Reference { .. } => true,
            XlValue::List(items) => !items.is_empty(),
        }
    }

    /// Render for trace output: text is quoted unless it reads as a number.
    pub fn render(&self) -> String {
        match self {
            XlValue::Text(s) => wrap_str_literal(s, false),
            other => other.to_string(),
        }
    }

    pub fn reference(sheet: impl Into<String>, address: LocalAddress) -> Self {
        XlValue::Reference {
            sheet: sheet.into(),
            address,
        }
    }
}

impl fmt::Display for XlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XlValue::Empty => Ok(()),
            XlValue::Number(n) => f.write_str(&format_number(*n)),
            XlValue::Text(s) => f.write_str(s),
            XlValue::Bool(true) => f.write_str("TRUE"),
            XlValue::Bool(false) => f.write_str("FALSE"),
            XlValue::Reference { sheet, address } => {
                write!(f, "{}!{address}", quote_sheet_name(sheet))
            }
            XlValue::List(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(&item.render())?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Classification of how completely an expression was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EvalStatus {
    FullEvaluation,
    PartialEvaluation,
    Error,
    NotImplemented,
    End,
    /// A resolved `IF` pushed its taken branch.
    Branching,
    /// An unresolved `IF` pushed both branches.
    FullBranching,
    /// Suppressed inside an inactive loop body.
    Ignored,
}

impl EvalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EvalStatus::FullEvaluation => "FullEvaluation",
            EvalStatus::PartialEvaluation => "PartialEvaluation",
            EvalStatus::Error => "Error",
            EvalStatus::NotImplemented => "NotImplemented",
            EvalStatus::End => "End",
            EvalStatus::Branching => "Branching",
            EvalStatus::FullBranching => "FullBranching",
            EvalStatus::Ignored => "Ignored",
        }
    }

    /// Statuses after which the walk falls through to the next formula row.
    pub fn falls_through(self) -> bool {
        matches!(
            self,
            EvalStatus::FullEvaluation
                | EvalStatus::PartialEvaluation
                | EvalStatus::NotImplemented
                | EvalStatus::Ignored
        )
    }
}

impl fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    /// Cell control flow continues at, when the expression jumped.
    pub next_cell: Option<CellLocation>,
    pub status: EvalStatus,
    pub value: XlValue,
    /// Human-readable rendering: the value when resolved, reconstructed source otherwise.
    pub text: String,
    pub output_level: u8,
}

impl EvalResult {
    pub fn new(status: EvalStatus, value: XlValue, text: impl Into<String>) -> Self {
        Self {
            next_cell: None,
            status,
            value,
            text: text.into(),
            output_level: 0,
        }
    }

    /// A fully resolved value, rendered with [`XlValue::render`].
    pub fn full(value: XlValue) -> Self {
        let text = value.render();
        Self::new(EvalStatus::FullEvaluation, value, text)
    }

    /// A fully resolved value with an explicit rendering.
    pub fn full_with_text(value: XlValue, text: impl Into<String>) -> Self {
        Self::new(EvalStatus::FullEvaluation, value, text)
    }

    /// Not fully resolved: the value is the reconstructed text.
    pub fn partial(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(EvalStatus::PartialEvaluation, XlValue::Text(text.clone()), text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(EvalStatus::Error, XlValue::Text(text.clone()), text)
    }

    pub fn with_status(mut self, status: EvalStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_next(mut self, next: Option<CellLocation>) -> Self {
        self.next_cell = next;
        self
    }

    pub fn is_full(&self) -> bool {
        self.status == EvalStatus::FullEvaluation
    }

    /// The rendered text without surrounding quotes.
    pub fn unwrapped_text(&self) -> String {
        unwrap_str_literal(&self.text)
    }
}

/// Quote `s` as a string literal, doubling inner quotes.
///
/// Numeric text is never quoted; already-quoted text is left alone unless `must_wrap`.
pub fn wrap_str_literal(s: &str, must_wrap: bool) -> String {
    if parse_number(s).is_some() {
        return s.to_string();
    }
    if !must_wrap && s.len() > 1 && s.starts_with('"') && s.ends_with('"') {
        return s.to_string();
    }
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Strip one layer of string-literal quoting, undoubling inner quotes.
pub fn unwrap_str_literal(s: &str) -> String {
    match s.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        Some(inner) if s.len() > 1 => inner.replace("\"\"", "\""),
        _ => s.to_string(),
    }
}

/// Integral numbers print without a fraction; others are rounded to 10 decimals.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", round_to(n, 10))
    }
}

/// Round half away from zero at `digits` decimals.
pub fn round_to(n: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let scaled = n * factor;
    if !scaled.is_finite() {
        return n;
    }
    scaled.round() / factor
}

/// Parse numeric text the way cells store it. Rejects the non-finite spellings `f64` accepts.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wraps_and_unwraps_literals() {
        assert_eq!(wrap_str_literal("abc", false), "\"abc\"");
        assert_eq!(wrap_str_literal("a\"b", false), "\"a\"\"b\"");
        assert_eq!(wrap_str_literal("12.5", true), "12.5");
        assert_eq!(wrap_str_literal("\"q\"", false), "\"q\"");
        assert_eq!(wrap_str_literal("\"q\"", true), "\"\"\"q\"\"\"");
        assert_eq!(unwrap_str_literal("\"a\"\"b\""), "a\"b");
        assert_eq!(unwrap_str_literal("\""), "\"");
        assert_eq!(unwrap_str_literal("plain"), "plain");
    }

    #[test]
    fn formats_numbers() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(round_to(2.5, 0), 3.0);
    }

    #[test]
    fn coerces_values() {
        assert_eq!(XlValue::text("TRUE").as_number(), Some(1.0));
        assert_eq!(XlValue::text("\"42\"").as_number(), Some(42.0));
        assert_eq!(XlValue::text("inf").as_number(), None);
        assert_eq!(XlValue::Empty.as_number(), Some(0.0));
        assert!(XlValue::text("yes").truthiness());
        assert!(!XlValue::text("0").truthiness());
        assert!(XlValue::text("anything").truthiness());
        assert!(!XlValue::Number(0.0).truthiness());
        assert_eq!(XlValue::from_cell_text("7"), XlValue::Number(7.0));
        assert_eq!(XlValue::text("x").render(), "\"x\"");
    }
}
