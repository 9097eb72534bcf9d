//! Environment probes: `ISERROR`, `NOW` and `DAY`.
//!
//! Sandbox checks in droppers tend to poll these, so the answers lean towards whatever
//! lets the macro make progress.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

use super::{CallSite, FunctionSpec};
use crate::emulator::Emulator;
use crate::oracle::non_printable_count;
use crate::parser::{Callee, Expr};
use crate::value::{format_number, wrap_str_literal, EvalResult, XlValue};

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec { name: "ISERROR", min_args: 1, max_args: 1, implementation: iserror_fn },
    FunctionSpec { name: "NOW", min_args: 0, max_args: 0, implementation: now_fn },
    FunctionSpec { name: "DAY", min_args: 1, max_args: 1, implementation: day_fn },
];

const SECONDS_PER_DAY: f64 = 86_400.0;

fn excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Days since 1899-12-30, with the time of day as the fraction.
pub(crate) fn excel_serial(at: NaiveDateTime) -> f64 {
    let elapsed = at - excel_epoch();
    elapsed.num_seconds() as f64 / SECONDS_PER_DAY
}

fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let seconds = (serial * SECONDS_PER_DAY).round() as i64;
    excel_epoch().checked_add_signed(Duration::seconds(seconds))
}

fn is_error_literal(value: &XlValue) -> bool {
    matches!(value, XlValue::Text(s) if s.starts_with('#') && (s.ends_with('!') || s.ends_with('?') || s == "#N/A"))
}

fn iserror_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    let answer = arg.value.is_empty() || is_error_literal(&arg.value);
    let max = em.config.max_iserror_loops;
    let answer = em.state.iserror.observe(site.cell, answer, max);
    let text = format!("ISERROR({})", wrap_str_literal(&arg.unwrapped_text(), false));
    EvalResult::full_with_text(XlValue::Bool(answer), text)
}

fn now_fn(em: &mut Emulator<'_>, _site: &CallSite<'_>) -> EvalResult {
    let offset = em.state.now_count * em.config.now_step_seconds;
    em.state.now_count += 1;
    let now = Utc::now().naive_utc() + Duration::seconds(offset);
    EvalResult::full(XlValue::Number(excel_serial(now)))
}

/// Whether `expr` reads the current time anywhere inside it.
fn reads_now(expr: &Expr) -> bool {
    match expr {
        Expr::Call(call) => {
            let is_now = matches!(&call.callee, Callee::Name(name) if name.eq_ignore_ascii_case("NOW"));
            is_now || call.args.iter().any(reads_now)
        }
        Expr::Paren(inner) | Expr::Unary { expr: inner, .. } => reads_now(inner),
        Expr::Binary { left, right, .. } => reads_now(left) || reads_now(right),
        _ => false,
    }
}

fn day_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    if let Some(day) = em.state.day_of_month {
        return EvalResult::full(XlValue::Number(f64::from(day)));
    }

    if reads_now(site.arg(0)) {
        let day = guess_day(em);
        em.state.day_of_month = Some(day);
        log::info!("guessed day of month {day}");
        return EvalResult::full(XlValue::Number(f64::from(day)));
    }

    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::new(arg.status, XlValue::Text(site.source_text()), site.source_text());
    }
    match arg.value.as_number().and_then(from_excel_serial) {
        Some(date) => EvalResult::full(XlValue::Number(f64::from(date.day()))),
        None => EvalResult::error(site.source_text()),
    }
}

/// Replay the macro once per candidate day and keep the day whose trace has the smallest
/// share of garbled output (non-printable characters plus failed `CHAR` calls).
///
/// Replays share the current run's deadline; once it passes, the best day so far is kept.
fn guess_day(em: &Emulator<'_>) -> u32 {
    let mut best = (1, f64::INFINITY);
    for day in 1..=31 {
        if em.timed_out() {
            log::info!("timeout reached while guessing the day of month, keeping {}", best.0);
            break;
        }
        let mut fork = em.fork_with_day(day);
        let mut garbled = 0usize;
        let mut total = 0usize;
        for step in fork.deobfuscate() {
            garbled += non_printable_count(&step.text);
            total += step.text.chars().count();
        }
        if total == 0 {
            continue;
        }
        let score = (garbled + fork.char_error_count()) as f64 / total as f64;
        log::debug!("day {day} scores {}", format_number(score));
        if score < best.1 {
            best = (day, score);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serial_dates_count_from_1899_12_30() {
        let at = NaiveDate::from_ymd_opt(2021, 3, 15)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        assert_eq!(excel_serial(at), 44270.5);
        assert_eq!(from_excel_serial(44270.5), Some(at));
        assert_eq!(from_excel_serial(-1.0), None);
    }

    #[test]
    fn finds_now_inside_expressions() {
        use crate::parser::{parse_formula, XlmSyntax};
        let expr = parse_formula("=DAY(NOW()+1)", XlmSyntax::default()).unwrap();
        let Expr::Call(call) = &expr else {
            panic!("expected a call, got {expr:?}");
        };
        assert!(reads_now(&call.args[0]));
        let plain = parse_formula("=DAY(44270)", XlmSyntax::default()).unwrap();
        let Expr::Call(call) = &plain else {
            panic!("expected a call, got {plain:?}");
        };
        assert!(!reads_now(&call.args[0]));
    }
}
