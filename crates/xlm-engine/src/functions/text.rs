//! String built-ins.

use super::{CallSite, FunctionSpec};
use crate::emulator::Emulator;
use crate::value::{format_number, unwrap_str_literal, wrap_str_literal, EvalResult, XlValue};

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec { name: "CHAR", min_args: 1, max_args: 1, implementation: char_fn },
    FunctionSpec { name: "CODE", min_args: 1, max_args: 1, implementation: code_fn },
    FunctionSpec { name: "CONCATENATE", min_args: 0, max_args: 255, implementation: concatenate_fn },
    FunctionSpec { name: "LEN", min_args: 1, max_args: 1, implementation: len_fn },
    FunctionSpec { name: "MID", min_args: 3, max_args: 3, implementation: mid_fn },
    FunctionSpec { name: "SEARCH", min_args: 2, max_args: 3, implementation: search_fn },
    FunctionSpec { name: "T", min_args: 1, max_args: 1, implementation: t_fn },
    FunctionSpec { name: "TEXT", min_args: 2, max_args: 2, implementation: text_fn },
    FunctionSpec { name: "VALUE", min_args: 1, max_args: 1, implementation: value_fn },
    FunctionSpec { name: "ARABIC", min_args: 1, max_args: 1, implementation: arabic_fn },
];

/// Windows-1252 code points 128..=159 whose Unicode scalar is not the byte value.
const CP1252_HIGH: &[(u32, u32)] = &[
    (0x20AC, 128),
    (0x201A, 130),
    (0x0192, 131),
    (0x201E, 132),
    (0x2026, 133),
    (0x2020, 134),
    (0x2021, 135),
    (0x02C6, 136),
    (0x2030, 137),
    (0x0160, 138),
    (0x2039, 139),
    (0x0152, 140),
    (0x017D, 142),
    (0x2018, 145),
    (0x2019, 146),
    (0x201C, 147),
    (0x201D, 148),
    (0x2022, 149),
    (0x2013, 150),
    (0x2014, 151),
    (0x02DC, 152),
    (0x2122, 153),
    (0x0161, 154),
    (0x203A, 155),
    (0x0153, 156),
    (0x017E, 158),
    (0x0178, 159),
];

/// Byte value of a character as Excel's `CODE` reports it.
pub(super) fn char_code(c: char) -> u32 {
    let scalar = u32::from(c);
    if scalar <= 0xFF {
        return scalar;
    }
    CP1252_HIGH
        .iter()
        .find(|(unicode, _)| *unicode == scalar)
        .map_or(scalar, |(_, byte)| *byte)
}

/// The plain string behind a fully evaluated result.
pub(super) fn text_value(result: &EvalResult) -> String {
    unwrap_str_literal(&result.value.to_string())
}

fn char_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(format!("CHAR({})", arg.text)).with_next(arg.next_cell);
    }
    let code = arg.value.as_number().filter(|n| (0.0..=255.0).contains(n));
    let result = match code {
        Some(code) => {
            let ch = char::from(code as u8).to_string();
            EvalResult::full_with_text(XlValue::Text(ch.clone()), ch)
        }
        None => {
            em.state.char_error_count += 1;
            EvalResult::error(site.source_text())
        }
    };
    result.with_next(arg.next_cell)
}

fn code_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(site.source_text());
    }
    let code = text_value(&arg).chars().next().map_or(0, char_code);
    EvalResult::full(XlValue::Number(f64::from(code)))
}

fn concatenate_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let mut joined = String::new();
    let mut full = true;
    for i in 0..site.args.len() {
        let part = em.arg(site, i);
        if part.is_full() {
            joined.push_str(&text_value(&part));
        } else {
            full = false;
            joined.push_str(&part.unwrapped_text());
        }
    }
    if full {
        EvalResult::full(XlValue::Text(joined))
    } else {
        EvalResult::partial(wrap_str_literal(&joined, false))
    }
}

fn len_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(site.source_text());
    }
    EvalResult::full(XlValue::Number(text_value(&arg).chars().count() as f64))
}

fn mid_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let text = em.arg(site, 0);
    let start = em.arg(site, 1);
    let length = em.arg(site, 2);
    let numbers = (start.is_full() && length.is_full())
        .then(|| start.value.as_number().zip(length.value.as_number()))
        .flatten();
    let (true, Some((start, length))) = (text.is_full(), numbers) else {
        return EvalResult::partial(format!(
            "MID({},{},{})",
            site.arg(0),
            site.arg(1),
            site.arg(2)
        ));
    };
    if start < 1.0 || length < 0.0 {
        return EvalResult::error(site.source_text());
    }
    let piece: String = text_value(&text)
        .chars()
        .skip(start as usize - 1)
        .take(length as usize)
        .collect();
    EvalResult::full_with_text(XlValue::Text(piece.clone()), piece)
}

/// 1-based, case-insensitive position of the needle; a miss yields an empty value.
fn search_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let needle = em.arg(site, 0);
    let haystack = em.arg(site, 1);
    if !(needle.is_full() && haystack.is_full()) {
        return EvalResult::partial(format!("SEARCH({},{})", needle.text, haystack.text));
    }
    let needle = text_value(&needle).to_lowercase();
    let haystack = text_value(&haystack).to_lowercase();
    match haystack.find(&needle) {
        Some(byte_pos) => {
            let pos = haystack[..byte_pos].chars().count() + 1;
            EvalResult::full(XlValue::Number(pos as f64))
        }
        None => EvalResult::full_with_text(XlValue::Empty, ""),
    }
}

fn t_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(site.source_text()).with_next(arg.next_cell);
    }
    let text = match &arg.value {
        XlValue::Reference { .. } => em
            .value_location(site.cell, &arg.value)
            .and_then(|loc| em.workbook.cell(loc))
            .and_then(|cell| cell.value.clone())
            .unwrap_or_default(),
        XlValue::Text(s) => unwrap_str_literal(s),
        _ => String::new(),
    };
    EvalResult::full_with_text(XlValue::Text(text.clone()), wrap_str_literal(&text, true))
        .with_next(arg.next_cell)
}

/// `TEXT(v, 0)`: the integer part of `v`. Other formats are not modelled.
fn text_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let value = em.arg(site, 0);
    let format = em.arg(site, 1);
    let integer_format = format.is_full() && text_value(&format).trim() == "0";
    match (value.is_full(), integer_format, value.value.as_number()) {
        (true, true, Some(n)) => {
            let n = n.trunc();
            EvalResult::full_with_text(XlValue::Number(n), format_number(n))
        }
        _ => EvalResult::partial(site.source_text()),
    }
}

fn value_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(site.source_text());
    }
    match XlValue::from_cell_text(text_value(&arg).trim()) {
        XlValue::Number(n) => EvalResult::full(XlValue::Number(n)),
        _ => EvalResult::error(site.source_text()),
    }
}

fn roman_digit(c: char) -> Option<i64> {
    Some(match c.to_ascii_uppercase() {
        'I' => 1,
        'V' => 5,
        'X' => 10,
        'L' => 50,
        'C' => 100,
        'D' => 500,
        'M' => 1000,
        _ => return None,
    })
}

/// Decode a roman numeral (subtractive notation, optional leading `-`). Empty text is zero.
fn from_roman(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let values = digits.chars().map(roman_digit).collect::<Option<Vec<_>>>()?;
    let mut total = 0;
    for (i, value) in values.iter().enumerate() {
        match values.get(i + 1) {
            Some(next) if next > value => total -= value,
            _ => total += value,
        }
    }
    Some(if negative { -total } else { total })
}

fn arabic_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let arg = em.arg(site, 0);
    if !arg.is_full() {
        return EvalResult::partial(site.source_text());
    }
    match from_roman(&text_value(&arg)) {
        Some(n) => EvalResult::full(XlValue::Number(n as f64)),
        None => EvalResult::error(site.source_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_roman_numerals() {
        assert_eq!(from_roman("MCMXCIV"), Some(1994));
        assert_eq!(from_roman("xlii"), Some(42));
        assert_eq!(from_roman("-IV"), Some(-4));
        assert_eq!(from_roman(""), Some(0));
        assert_eq!(from_roman("IIZ"), None);
    }

    #[test]
    fn maps_cp1252_code_points() {
        assert_eq!(char_code('A'), 65);
        assert_eq!(char_code('\u{20AC}'), 128);
        assert_eq!(char_code('\u{2122}'), 153);
        assert_eq!(char_code('\u{e9}'), 0xE9);
    }
}
