//! Numeric and logical built-ins.

use rand::Rng;

use super::{CallSite, FunctionSpec};
use crate::emulator::Emulator;
use crate::value::{round_to, EvalResult, XlValue};

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec { name: "ABS", min_args: 1, max_args: 1, implementation: abs_fn },
    FunctionSpec { name: "INT", min_args: 1, max_args: 1, implementation: int_fn },
    FunctionSpec { name: "TRUNC", min_args: 1, max_args: 2, implementation: trunc_fn },
    FunctionSpec { name: "ROUND", min_args: 2, max_args: 2, implementation: round_fn },
    FunctionSpec { name: "ROUNDUP", min_args: 2, max_args: 2, implementation: roundup_fn },
    FunctionSpec { name: "MOD", min_args: 2, max_args: 2, implementation: mod_fn },
    FunctionSpec { name: "QUOTIENT", min_args: 2, max_args: 2, implementation: quotient_fn },
    FunctionSpec { name: "SQRT", min_args: 1, max_args: 1, implementation: sqrt_fn },
    FunctionSpec { name: "SUM", min_args: 1, max_args: 255, implementation: sum_fn },
    FunctionSpec { name: "PRODUCT", min_args: 1, max_args: 255, implementation: product_fn },
    FunctionSpec { name: "MIN", min_args: 1, max_args: 255, implementation: min_fn },
    FunctionSpec { name: "MAX", min_args: 1, max_args: 255, implementation: max_fn },
    FunctionSpec { name: "RANDBETWEEN", min_args: 2, max_args: 2, implementation: randbetween_fn },
    FunctionSpec { name: "AND", min_args: 1, max_args: 255, implementation: and_fn },
    FunctionSpec { name: "OR", min_args: 1, max_args: 255, implementation: or_fn },
    FunctionSpec { name: "NOT", min_args: 1, max_args: 1, implementation: not_fn },
    FunctionSpec { name: "ISNUMBER", min_args: 1, max_args: 1, implementation: isnumber_fn },
];

/// Evaluate the first `N` arguments as numbers; `None` means at least one did not resolve.
fn numbers<const N: usize>(em: &mut Emulator<'_>, site: &CallSite<'_>) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    for (i, slot) in out.iter_mut().enumerate() {
        let arg = em.arg(site, i);
        if !arg.is_full() {
            return None;
        }
        *slot = arg.value.as_number()?;
    }
    Some(out)
}

/// Shared shape of the fixed-arity numeric functions: unresolved arguments give a partial
/// result, `f` returning `None` is an error.
fn numeric<const N: usize>(
    em: &mut Emulator<'_>,
    site: &CallSite<'_>,
    f: impl FnOnce([f64; N]) -> Option<f64>,
) -> EvalResult {
    let Some(args) = numbers::<N>(em, site) else {
        return EvalResult::partial(site.source_text());
    };
    match f(args).filter(|n| n.is_finite()) {
        Some(n) => EvalResult::full(XlValue::Number(round_to(n, 10))),
        None => EvalResult::error(site.source_text()),
    }
}

fn abs_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    numeric(em, site, |[n]: [f64; 1]| Some(n.abs()))
}

fn int_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    numeric(em, site, |[n]: [f64; 1]| Some(n.floor()))
}

fn trunc_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    if site.has_arg(1) {
        return numeric(em, site, |[n, digits]: [f64; 2]| {
            let factor = 10f64.powi(digits as i32);
            Some((n * factor).trunc() / factor)
        });
    }
    numeric(em, site, |[n]: [f64; 1]| Some(n.trunc()))
}

fn round_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    numeric(em, site, |[n, digits]: [f64; 2]| Some(round_to(n, digits as i32)))
}

/// Away from zero at `digits` decimals.
fn roundup_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    numeric(em, site, |[n, digits]: [f64; 2]| {
        let factor = 10f64.powi(digits as i32);
        let scaled = round_to(n.abs() * factor, 9).ceil() / factor;
        Some(scaled.copysign(n))
    })
}

fn mod_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    numeric(em, site, |[a, b]: [f64; 2]| (b != 0.0).then(|| a - b * (a / b).floor()))
}

fn quotient_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    numeric(em, site, |[a, b]: [f64; 2]| (b != 0.0).then(|| (a / b).trunc()))
}

/// Integer square root; the macros that use it only ever need whole results.
fn sqrt_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    numeric(em, site, |[n]: [f64; 1]| (n >= 0.0).then(|| n.sqrt().floor()))
}

/// Fold every argument as a number. Lists are flattened.
fn fold(
    em: &mut Emulator<'_>,
    site: &CallSite<'_>,
    init: f64,
    f: impl Fn(f64, f64) -> f64,
) -> EvalResult {
    let mut acc = init;
    for i in 0..site.args.len() {
        let arg = em.arg(site, i);
        if !arg.is_full() {
            return EvalResult::partial(site.source_text());
        }
        let items = match arg.value {
            XlValue::List(items) => items,
            other => vec![other],
        };
        for item in items {
            let Some(n) = item.as_number() else {
                return EvalResult::error(site.source_text());
            };
            acc = f(acc, n);
        }
    }
    EvalResult::full(XlValue::Number(round_to(acc, 10)))
}

fn sum_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    fold(em, site, 0.0, |a, b| a + b)
}

fn product_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    fold(em, site, 1.0, |a, b| a * b)
}

fn min_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    fold(em, site, f64::INFINITY, f64::min)
}

fn max_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    fold(em, site, f64::NEG_INFINITY, f64::max)
}

fn randbetween_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let Some([low, high]) = numbers::<2>(em, site) else {
        return EvalResult::partial(site.source_text());
    };
    let (low, high) = (low.ceil() as i64, high.floor() as i64);
    if low > high {
        return EvalResult::error(site.source_text());
    }
    let n = rand::thread_rng().gen_range(low..=high);
    EvalResult::full(XlValue::Number(n as f64))
}

/// `AND`/`OR`: stop at the first argument that decides the result.
fn logical(em: &mut Emulator<'_>, site: &CallSite<'_>, decisive: bool) -> EvalResult {
    for i in 0..site.args.len() {
        let arg = em.arg(site, i);
        if !arg.is_full() {
            return EvalResult::partial(site.source_text());
        }
        if arg.value.truthiness() == decisive {
            return EvalResult::full(XlValue::Bool(decisive));
        }
    }
    EvalResult::full(XlValue::Bool(!decisive))
}

fn and_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    logical(em, site, false)
}

fn or_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    logical(em, site, true)
}

fn not_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(site.source_text());
    }
    EvalResult::full(XlValue::Bool(!arg.value.truthiness()))
}

fn isnumber_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(site.source_text());
    }
    let numeric = match &arg.value {
        XlValue::Number(_) => true,
        XlValue::Text(s) => crate::value::parse_number(s).is_some(),
        _ => false,
    };
    EvalResult::full(XlValue::Bool(numeric))
}
