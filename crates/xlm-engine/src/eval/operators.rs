use chrono::{NaiveDateTime, NaiveTime, Timelike};
use xlm_model::CellLocation;

use crate::emulator::Emulator;
use crate::parser::BinaryOp;
use crate::value::{round_to, unwrap_str_literal, EvalResult, EvalStatus, XlValue};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_OUTPUT: &str = "%Y-%m-%d %H:%M:%S";
const SECONDS_PER_DAY: f64 = 86_400.0;

fn parse_datetime(value: &XlValue) -> Option<NaiveDateTime> {
    match value {
        XlValue::Text(s) => NaiveDateTime::parse_from_str(unwrap_str_literal(s).trim(), DATETIME_FORMAT).ok(),
        _ => None,
    }
}

fn parse_time_of_day(value: &XlValue) -> Option<NaiveTime> {
    match value {
        XlValue::Text(s) => NaiveTime::parse_from_str(unwrap_str_literal(s).trim(), "%H:%M:%S").ok(),
        _ => None,
    }
}

/// Numeric operand: plain coercion, then empty text as zero, then `HH:MM:SS` as a day fraction.
fn numeric_operand(value: &XlValue) -> Option<f64> {
    if let Some(n) = value.as_number() {
        return Some(n);
    }
    if let XlValue::Text(s) = value {
        if unwrap_str_literal(s).trim().is_empty() {
            return Some(0.0);
        }
    }
    parse_time_of_day(value).map(|t| f64::from(t.num_seconds_from_midnight()) / SECONDS_PER_DAY)
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::Le => a <= b,
        BinaryOp::Ge => a >= b,
        _ => false,
    }
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return None,
        BinaryOp::Div => a / b,
        BinaryOp::Pow => a.powf(b),
        _ => return None,
    };
    out.is_finite().then(|| round_to(out, 10))
}

impl Emulator<'_> {
    /// Concrete operand value; references read the target's cached value.
    fn operand(&self, result: &EvalResult) -> XlValue {
        match &result.value {
            XlValue::Reference { sheet, address } => self
                .workbook
                .sheet_id(sheet)
                .and_then(|id| self.workbook.cell(CellLocation::new(id, *address)))
                .and_then(|c| c.value.as_deref())
                .map_or(XlValue::text(""), XlValue::from_cell_text),
            other => other.clone(),
        }
    }

    pub(crate) fn apply_binary(
        &mut self,
        op: BinaryOp,
        left: EvalResult,
        right: EvalResult,
    ) -> EvalResult {
        let source = format!("{}{}{}", left.text, op.symbol(), right.text);
        if !(left.is_full() && right.is_full()) {
            return EvalResult::partial(source);
        }
        let (lv, rv) = (self.operand(&left), self.operand(&right));

        if op == BinaryOp::Concat {
            return EvalResult::full(XlValue::Text(format!("{lv}{rv}")));
        }
        if matches!(lv, XlValue::List(_)) || matches!(rv, XlValue::List(_)) {
            return EvalResult::new(EvalStatus::NotImplemented, XlValue::text(source.clone()), source);
        }

        if let (Some(a), Some(b)) = (parse_datetime(&lv), parse_datetime(&rv)) {
            let (a, b) = (a.and_utc().timestamp() as f64, b.and_utc().timestamp() as f64);
            return match op {
                _ if op.is_comparison() => EvalResult::full(XlValue::Bool(compare(op, a, b))),
                BinaryOp::Add | BinaryOp::Sub => {
                    let secs = if op == BinaryOp::Add { a + b } else { a - b };
                    EvalResult::full(XlValue::Number(secs))
                }
                _ => EvalResult::error(source),
            };
        }
        if let (Some(dt), Some(t), BinaryOp::Add | BinaryOp::Sub) =
            (parse_datetime(&lv), parse_time_of_day(&rv), op)
        {
            let delta = chrono::Duration::seconds(i64::from(t.num_seconds_from_midnight()));
            let shifted = if op == BinaryOp::Add { dt + delta } else { dt - delta };
            return EvalResult::full(XlValue::Text(shifted.format(DATETIME_OUTPUT).to_string()));
        }

        if let (Some(a), Some(b)) = (numeric_operand(&lv), numeric_operand(&rv)) {
            if op.is_comparison() {
                return EvalResult::full(XlValue::Bool(compare(op, a, b)));
            }
            return match arithmetic(op, a, b) {
                Some(n) => EvalResult::full(XlValue::Number(n)),
                None => EvalResult::error(source),
            };
        }

        if op.is_comparison() {
            let (a, b) = (lv.to_string().to_lowercase(), rv.to_string().to_lowercase());
            return EvalResult::full(XlValue::Bool(compare(op, a, b)));
        }
        EvalResult::error(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use xlm_model::FixtureWorkbook;

    fn full(value: XlValue) -> EvalResult {
        EvalResult::full(value)
    }

    fn apply(op: BinaryOp, a: XlValue, b: XlValue) -> EvalResult {
        let fixture = FixtureWorkbook::new("ops.xlsm");
        let mut emulator = Emulator::new(&fixture);
        emulator.apply_binary(op, full(a), full(b))
    }

    #[test]
    fn arithmetic_and_coercion() {
        assert_eq!(
            apply(BinaryOp::Add, XlValue::Number(1.0), XlValue::text("TRUE")).value,
            XlValue::Number(2.0)
        );
        assert_eq!(
            apply(BinaryOp::Mul, XlValue::text(""), XlValue::Number(5.0)).value,
            XlValue::Number(0.0)
        );
        assert_eq!(
            apply(BinaryOp::Add, XlValue::Number(0.1), XlValue::Number(0.2)).text,
            "0.3"
        );
        assert_eq!(
            apply(BinaryOp::Div, XlValue::Number(1.0), XlValue::Number(0.0)).status,
            EvalStatus::Error
        );
        assert_eq!(
            apply(BinaryOp::Pow, XlValue::Number(2.0), XlValue::Number(10.0)).value,
            XlValue::Number(1024.0)
        );
    }

    #[test]
    fn text_comparison_is_case_insensitive() {
        let result = apply(BinaryOp::Eq, XlValue::text("Abc"), XlValue::text("aBC"));
        assert_eq!(result.value, XlValue::Bool(true));
        assert_eq!(result.text, "TRUE");
        assert_eq!(
            apply(BinaryOp::Sub, XlValue::text("abc"), XlValue::Number(1.0)).status,
            EvalStatus::Error
        );
    }

    #[test]
    fn time_strings_are_day_fractions() {
        let result = apply(BinaryOp::Mul, XlValue::text("12:00:00"), XlValue::Number(2.0));
        assert_eq!(result.value, XlValue::Number(1.0));

        let shifted = apply(
            BinaryOp::Add,
            XlValue::text("2021-01-01 10:00:00"),
            XlValue::text("00:00:03"),
        );
        assert_eq!(shifted.value, XlValue::text("2021-01-01 10:00:03"));

        let later = apply(
            BinaryOp::Gt,
            XlValue::text("2021-01-02 00:00:00"),
            XlValue::text("2021-01-01 23:59:59"),
        );
        assert_eq!(later.value, XlValue::Bool(true));
    }

    #[test]
    fn partial_operands_keep_source_text() {
        let fixture = FixtureWorkbook::new("ops.xlsm");
        let mut emulator = Emulator::new(&fixture);
        let result = emulator.apply_binary(
            BinaryOp::Concat,
            EvalResult::partial("B1"),
            full(XlValue::text("x")),
        );
        assert_eq!(result.status, EvalStatus::PartialEvaluation);
        assert_eq!(result.text, "B1&\"x\"");
    }
}
