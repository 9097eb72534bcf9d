//! Grid writes, names, selection, lookups and environment queries.

use regex::RegexBuilder;
use xlm_model::{
    column_name, relative_offset, CellLocation, LocalAddress, NameValue, MAX_COLUMN, MAX_ROW,
};

use super::{CallSite, FunctionSpec};
use crate::emulator::Emulator;
use crate::parser::Expr;
use crate::value::{wrap_str_literal, EvalResult, EvalStatus, XlValue};

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec { name: "FORMULA", min_args: 0, max_args: 2, implementation: formula_fn },
    FunctionSpec { name: "FORMULA.FILL", min_args: 0, max_args: 2, implementation: formula_fn },
    FunctionSpec { name: "FORMULA.ARRAY", min_args: 0, max_args: 2, implementation: formula_fn },
    FunctionSpec { name: "SET.VALUE", min_args: 2, max_args: 2, implementation: set_value_fn },
    FunctionSpec { name: "SET.NAME", min_args: 1, max_args: 2, implementation: set_name_fn },
    FunctionSpec { name: "DEFINE.NAME", min_args: 2, max_args: 7, implementation: define_name_fn },
    FunctionSpec { name: "SELECT", min_args: 1, max_args: 2, implementation: select_fn },
    FunctionSpec { name: "ACTIVE.CELL", min_args: 0, max_args: 0, implementation: active_cell_fn },
    FunctionSpec { name: "GET.CELL", min_args: 1, max_args: 2, implementation: get_cell_fn },
    FunctionSpec { name: "GET.DOCUMENT", min_args: 1, max_args: 2, implementation: get_document_fn },
    FunctionSpec { name: "GET.WINDOW", min_args: 1, max_args: 2, implementation: get_window_fn },
    FunctionSpec { name: "GET.WORKSPACE", min_args: 1, max_args: 1, implementation: get_workspace_fn },
    FunctionSpec { name: "APP.MAXIMIZE", min_args: 0, max_args: 0, implementation: app_maximize_fn },
    FunctionSpec { name: "DIRECTORY", min_args: 0, max_args: 1, implementation: directory_fn },
    FunctionSpec { name: "ERROR", min_args: 0, max_args: 2, implementation: error_fn },
    FunctionSpec { name: "INDEX", min_args: 2, max_args: 4, implementation: index_fn },
    FunctionSpec { name: "ROWS", min_args: 1, max_args: 1, implementation: rows_fn },
    FunctionSpec { name: "COUNTA", min_args: 1, max_args: 255, implementation: counta_fn },
    FunctionSpec { name: "COUNT", min_args: 0, max_args: 255, implementation: count_fn },
    FunctionSpec { name: "HLOOKUP", min_args: 3, max_args: 4, implementation: hlookup_fn },
    FunctionSpec { name: "OFFSET", min_args: 3, max_args: 5, implementation: offset_fn },
    FunctionSpec { name: "ADDRESS", min_args: 2, max_args: 5, implementation: address_fn },
    FunctionSpec { name: "ABSREF", min_args: 2, max_args: 2, implementation: absref_fn },
    FunctionSpec { name: "INDIRECT", min_args: 1, max_args: 2, implementation: indirect_fn },
];

/// Every location of the inclusive rectangle `start..=end`, row-major.
fn rectangle(start: CellLocation, end: CellLocation) -> impl Iterator<Item = CellLocation> {
    let (r0, r1) = (start.address.row.min(end.address.row), start.address.row.max(end.address.row));
    let (c0, c1) = (start.address.col.min(end.address.col), start.address.col.max(end.address.col));
    (r0..=r1).flat_map(move |row| {
        (c0..=c1).map(move |col| CellLocation::new(start.sheet, LocalAddress::new(col, row)))
    })
}

/// Number of cells in the inclusive rectangle `start..=end`.
fn rectangle_size(start: CellLocation, end: CellLocation) -> u64 {
    let rows = u64::from(start.address.row.abs_diff(end.address.row)) + 1;
    let cols = u64::from(start.address.col.abs_diff(end.address.col)) + 1;
    rows * cols
}

/// Shared body of `FORMULA`, `FORMULA.FILL`, `FORMULA.ARRAY` and `SET.VALUE`.
///
/// A fully evaluated source is written into every destination cell. Anything less marks the
/// destination cells as failed writes so later reads of them can ask for a value.
fn write_cells(
    em: &mut Emulator<'_>,
    site: &CallSite<'_>,
    source_index: usize,
    dest_index: usize,
    value_only: bool,
) -> EvalResult {
    let name = site.name.to_ascii_uppercase();
    if site.args.is_empty() {
        return EvalResult::full_with_text(XlValue::Bool(false), format!("{name}()"));
    }

    let source = em.arg(site, source_index);
    let destination = em.range_arg(site, dest_index);
    let dest_text = site.arg(dest_index).to_string();
    let text = if source_index == 0 {
        format!("{name}({},{dest_text})", source.text)
    } else {
        format!("{name}({dest_text},{})", source.text)
    };
    let Some((start, end)) = destination else {
        return EvalResult::partial(text);
    };
    let size = rectangle_size(start, end);
    if size > em.config.max_range_cells {
        log::warn!(
            "{name} at {} targets {size} cells (limit {}), not writing",
            em.location_text(site.cell),
            em.config.max_range_cells
        );
        return EvalResult::partial(text);
    }

    let status = if source.is_full() {
        let written = source.value.to_string();
        for loc in rectangle(start, end) {
            em.state.failed_writes.remove(&loc);
            em.set_cell(loc, &written, value_only);
        }
        EvalStatus::FullEvaluation
    } else {
        em.state.failed_writes.extend(rectangle(start, end));
        EvalStatus::PartialEvaluation
    };
    EvalResult::new(status, XlValue::Empty, text)
}

fn formula_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    write_cells(em, site, 0, 1, false)
}

fn set_value_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    write_cells(em, site, 1, 0, true)
}

/// Name argument: a bare identifier is taken literally, anything else is evaluated.
fn name_arg(em: &mut Emulator<'_>, site: &CallSite<'_>, i: usize) -> Option<String> {
    match site.arg(i) {
        Expr::Name(name) => Some(name.clone()),
        other => {
            let result = em.evaluate(site.cell, other, site.interactive);
            result.is_full().then(|| result.unwrapped_text())
        }
    }
}

fn name_value(value: &XlValue) -> NameValue {
    match value {
        XlValue::Reference { sheet, address } => NameValue::Reference {
            sheet: sheet.clone(),
            address: *address,
        },
        XlValue::Number(n) => NameValue::Number(*n),
        XlValue::List(items) => NameValue::List(items.iter().map(ToString::to_string).collect()),
        other => NameValue::Text(other.to_string()),
    }
}

fn set_name_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let Some(label) = name_arg(em, site, 0) else {
        return EvalResult::partial(site.source_text());
    };
    let label = label.to_lowercase();

    if !site.has_arg(1) {
        em.workbook.names_mut().remove(&label);
        return EvalResult::full_with_text(XlValue::Empty, format!("SET.NAME({label})"));
    }

    let (bound, shown) = match site.arg(1) {
        Expr::Cell(reference) => {
            let Some(loc) = em.resolve_reference(site.cell, reference) else {
                return EvalResult::partial(site.source_text());
            };
            let sheet = em.sheet_name(loc.sheet).to_string();
            (
                NameValue::Reference {
                    sheet,
                    address: loc.address,
                },
                reference.to_string(),
            )
        }
        other => {
            let result = em.evaluate(site.cell, other, site.interactive);
            if !result.is_full() {
                return EvalResult::new(result.status, XlValue::Empty, site.source_text());
            }
            (name_value(&result.value), result.unwrapped_text())
        }
    };
    log::debug!("SET.NAME {label} = {bound}");
    em.workbook.names_mut().insert(&label, bound);
    em.state.evict_current_formula = true;
    EvalResult::full_with_text(XlValue::Empty, format!("SET.NAME({label},{shown})"))
}

fn define_name_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let Some(label) = name_arg(em, site, 0) else {
        return EvalResult::partial(site.source_text());
    };
    let label = label.to_lowercase();
    let value = em.arg(site, 1);
    if !value.is_full() {
        return EvalResult::partial(site.source_text());
    }
    let bound = name_value(&value.value);
    let text = format!("DEFINE.NAME({},{bound})", wrap_str_literal(&label, false));
    em.workbook.names_mut().insert(&label, bound);
    em.state.evict_current_formula = true;
    EvalResult::full_with_text(XlValue::Empty, text)
}

fn select_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let base = em.state.active_cell.unwrap_or(site.cell);
    let selected = if site.args.len() == 2 {
        if site.has_arg(0) {
            em.range_arg(site, 0);
        }
        match site.arg(1) {
            Expr::Cell(reference) => em.resolve_reference(base, reference),
            other => em.range_of(base, other).map(|(start, _)| start),
        }
    } else {
        match site.arg(0) {
            Expr::Cell(reference) => em.resolve_reference(base, reference),
            Expr::Range(_) => em
                .range_arg(site, 0)
                .and_then(|_| em.state.selected_range)
                .map(|range| range.selected.unwrap_or(range.start)),
            _ => em.target_arg(site, 0),
        }
    };

    let status = match selected {
        Some(loc) => {
            em.state.active_cell = Some(loc);
            EvalStatus::FullEvaluation
        }
        None => EvalStatus::PartialEvaluation,
    };
    EvalResult::new(status, XlValue::Empty, site.source_text())
}

fn active_cell_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    match em.state.active_cell {
        Some(loc) => {
            let display = em.location_text(loc);
            em.read_cell(loc, &display, site.interactive)
        }
        None => EvalResult::partial(site.source_text()),
    }
}

fn get_cell_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let info_type = em.arg(site, 0);
    let target = if site.has_arg(1) {
        em.target_arg(site, 1)
    } else {
        Some(site.cell)
    };
    let (Some(info_type), Some(target)) = (
        info_type.value.as_integer().filter(|_| info_type.is_full()),
        target,
    ) else {
        return EvalResult::partial(site.source_text());
    };
    let Ok(info_type) = u32::try_from(info_type) else {
        return EvalResult::partial(site.source_text());
    };

    let sheet = em.sheet_name(target.sheet).to_string();
    let info = em.source.cell_info(&sheet, target.address, info_type);
    if info.not_implemented {
        return EvalResult::partial(site.source_text());
    }
    match info.data {
        Some(data) => EvalResult::full_with_text(XlValue::from_cell_text(&data), data),
        None => EvalResult::full_with_text(XlValue::text(""), ""),
    }
}

/// `[workbook]sheet` for the sheet holding `cell`.
fn window_title(em: &Emulator<'_>, cell: CellLocation) -> String {
    format!("[{}]{}", em.workbook.name(), em.sheet_name(cell.sheet))
}

fn integer_arg(em: &mut Emulator<'_>, site: &CallSite<'_>, i: usize) -> Option<i64> {
    let result = em.arg(site, i);
    if !result.is_full() {
        return None;
    }
    result.value.as_integer()
}

fn get_document_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    match integer_arg(em, site, 0) {
        Some(76) => EvalResult::full(XlValue::Text(window_title(em, site.cell))),
        Some(88) => EvalResult::full(XlValue::text(em.workbook.name())),
        Some(_) => EvalResult::partial(site.source_text()),
        None => EvalResult::error(site.source_text()),
    }
}

fn get_window_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let Some(id) = integer_arg(em, site, 0) else {
        return EvalResult::partial(site.source_text());
    };
    if id == 1 || id == 30 {
        return EvalResult::full(XlValue::Text(window_title(em, site.cell)));
    }
    let answer = u32::try_from(id)
        .ok()
        .and_then(|id| em.config.window.get(&id).cloned());
    match answer {
        Some(answer) => {
            EvalResult::full_with_text(XlValue::from_cell_text(&answer), answer)
        }
        None => EvalResult::partial(site.source_text()),
    }
}

fn get_workspace_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let Some(id) = integer_arg(em, site, 0) else {
        return EvalResult::partial(site.source_text());
    };
    let answer = u32::try_from(id)
        .ok()
        .and_then(|id| em.config.workspace.get(&id).cloned());
    match answer {
        Some(answer) => EvalResult::full_with_text(
            XlValue::from_cell_text(&answer),
            format!("GET.WORKSPACE({id})"),
        ),
        None => EvalResult::partial(site.source_text()),
    }
}

fn app_maximize_fn(_em: &mut Emulator<'_>, _site: &CallSite<'_>) -> EvalResult {
    EvalResult::full(XlValue::Bool(true))
}

fn directory_fn(em: &mut Emulator<'_>, _site: &CallSite<'_>) -> EvalResult {
    EvalResult::full(XlValue::Text(em.config.directory.clone()))
}

fn error_fn(_em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    EvalResult::full_with_text(XlValue::Empty, site.source_text())
}

fn is_reference_expr(expr: &Expr) -> bool {
    matches!(expr, Expr::Cell(_) | Expr::Range(_))
}

fn index_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let Some(index) = integer_arg(em, site, 1).filter(|n| *n >= 1) else {
        return EvalResult::partial(site.source_text());
    };

    let range = if is_reference_expr(site.arg(0)) {
        em.range_arg(site, 0)
    } else {
        let array = em.arg(site, 0);
        if !array.is_full() {
            return EvalResult::partial(site.source_text());
        }
        match &array.value {
            XlValue::List(items) => {
                return match usize::try_from(index - 1).ok().and_then(|i| items.get(i)) {
                    Some(item) => EvalResult::full(item.clone()),
                    None => EvalResult::error(site.source_text()),
                };
            }
            XlValue::Text(text) => em.range_of_text(site.cell, text),
            XlValue::Reference { .. } => em.value_location(site.cell, &array.value).map(|l| (l, l)),
            _ => None,
        }
    };

    let target = range.and_then(|(start, _)| {
        let address = start.address.offset(index - 1, 0)?;
        Some(CellLocation::new(start.sheet, address))
    });
    match target {
        Some(loc) => {
            let display = em.location_text(loc);
            em.read_cell(loc, &display, site.interactive)
        }
        None => EvalResult::partial(site.source_text()),
    }
}

fn rows_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let range = if is_reference_expr(site.arg(0)) {
        em.range_arg(site, 0)
    } else {
        let array = em.arg(site, 0);
        if !array.is_full() {
            return EvalResult::partial(site.source_text());
        }
        if let XlValue::List(items) = &array.value {
            return EvalResult::full(XlValue::Number(items.len() as f64));
        }
        em.range_of(site.cell, site.arg(0))
    };
    match range {
        Some((start, end)) => {
            let rows = start.address.row.abs_diff(end.address.row) + 1;
            EvalResult::full(XlValue::Number(f64::from(rows)))
        }
        None => EvalResult::partial(site.source_text()),
    }
}

fn counta_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let mut count = 0usize;
    for i in 0..site.args.len() {
        let Some((start, end)) = em.range_arg(site, i) else {
            return EvalResult::partial(site.source_text());
        };
        count += em
            .workbook
            .sheet(start.sheet)
            .cells_in_range(start.address, end.address)
            .into_iter()
            .filter(|cell| cell.value.as_deref() != Some(""))
            .count();
    }
    EvalResult::full(XlValue::Number(count as f64))
}

fn count_fn(_em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    EvalResult::full(XlValue::Number(site.args.len() as f64))
}

/// `HLOOKUP(pattern, range, row, FALSE)`: first cell, from `row` of the range down, whose
/// value matches `pattern` at its start. `*` alone matches anything.
fn hlookup_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let pattern = em.arg(site, 0);
    let row = integer_arg(em, site, 2);
    let exact = site.has_arg(3) && {
        let flag = em.arg(site, 3);
        flag.is_full() && !flag.value.truthiness()
    };
    let range = em.range_arg(site, 1);
    let (Some(row), Some((start, end)), true, true) = (row, range, exact, pattern.is_full()) else {
        return EvalResult::partial(site.source_text());
    };

    let raw = pattern.unwrapped_text();
    let raw = if raw == "*" { ".*".to_string() } else { raw };
    let Ok(regex) = RegexBuilder::new(&format!("^(?:{raw})")).build() else {
        return EvalResult::partial(site.source_text());
    };

    let first_row = start.address.row.min(end.address.row);
    let last_row = start.address.row.max(end.address.row);
    let from_row = u32::try_from(i64::from(first_row) + row - 1).unwrap_or(0);
    if from_row < first_row || from_row > last_row {
        return EvalResult::full_with_text(XlValue::text(""), "");
    }
    let from = LocalAddress::new(start.address.col.min(end.address.col), from_row);
    let to = LocalAddress::new(start.address.col.max(end.address.col), last_row);
    let found = em
        .workbook
        .sheet(start.sheet)
        .cells_in_range(from, to)
        .into_iter()
        .find_map(|cell| cell.value.clone().filter(|value| regex.is_match(value)));
    match found {
        Some(value) => EvalResult::full_with_text(XlValue::from_cell_text(&value), value),
        None => EvalResult::full_with_text(XlValue::text(""), ""),
    }
}

/// `OFFSET(ref, rows, cols)`: a reference value, and a jump target when it lands on a
/// macro formula (for `OFFSET(...)()` style calls).
fn offset_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let base = em.target_arg(site, 0);
    let rows = integer_arg(em, site, 1);
    let cols = integer_arg(em, site, 2);
    let target = match (base, rows, cols) {
        (Some(base), Some(rows), Some(cols)) => base
            .address
            .offset(rows, cols)
            .map(|address| CellLocation::new(base.sheet, address)),
        _ => None,
    };
    let Some(target) = target else {
        return EvalResult::partial(site.source_text());
    };
    let sheet = em.sheet_name(target.sheet).to_string();
    let next = em.formula_cell_at(target);
    EvalResult::full_with_text(XlValue::reference(sheet, target.address), site.source_text())
        .with_next(next)
}

fn address_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let row = integer_arg(em, site, 0);
    let col = integer_arg(em, site, 1);
    let abs_num = if site.has_arg(2) {
        integer_arg(em, site, 2)
    } else {
        Some(1)
    };
    let a1 = if site.has_arg(3) {
        let style = em.arg(site, 3);
        style.is_full().then(|| style.value.truthiness())
    } else {
        Some(true)
    };
    let sheet = if site.has_arg(4) {
        let sheet = em.arg(site, 4);
        sheet.is_full().then(|| sheet.unwrapped_text())
    } else {
        Some(em.sheet_name(site.cell.sheet).to_string())
    };

    let (Some(row), Some(col), Some(abs_num), Some(a1), Some(sheet)) = (row, col, abs_num, a1, sheet)
    else {
        return EvalResult::partial(site.source_text());
    };
    let local = if a1 {
        let col = u32::try_from(col).ok().filter(|c| (1..=MAX_COLUMN).contains(c));
        let row_ok = u32::try_from(row).is_ok_and(|r| (1..=MAX_ROW).contains(&r));
        let (Some(col), true) = (col, row_ok) else {
            return EvalResult::error(site.source_text());
        };
        let col = column_name(col);
        match abs_num {
            2 => format!("{col}${row}"),
            3 => format!("${col}{row}"),
            4 => format!("{col}{row}"),
            _ => format!("${col}${row}"),
        }
    } else {
        match abs_num {
            2 => format!("R{row}C[{col}]"),
            3 => format!("R[{row}]C{col}"),
            4 => format!("R[{row}]C[{col}]"),
            _ => format!("R{row}C{col}"),
        }
    };
    EvalResult::full(XlValue::Text(format!("{sheet}!{local}")))
}

fn absref_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let offset = em.arg(site, 0);
    let Expr::Cell(base) = site.arg(1) else {
        return EvalResult::partial(site.source_text());
    };
    if !offset.is_full() {
        return EvalResult::partial(site.source_text());
    }
    match relative_offset(&base.to_string(), &offset.unwrapped_text()) {
        Some(address) => EvalResult::full(XlValue::Text(address)),
        None => EvalResult::partial(site.source_text()),
    }
}

fn indirect_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let address = em.arg(site, 0);
    let target = if address.is_full() {
        em.value_location(site.cell, &address.value)
    } else {
        None
    };
    match target {
        Some(loc) => {
            let display = em.location_text(loc);
            em.read_cell(loc, &display, site.interactive)
        }
        None => EvalResult::partial(site.source_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use xlm_model::SheetId;

    #[test]
    fn rectangle_is_row_major() {
        let at = |col, row| CellLocation::new(SheetId(0), LocalAddress::new(col, row));
        let cells: Vec<String> = rectangle(at(2, 2), at(1, 3))
            .map(|loc| loc.address.to_string())
            .collect();
        assert_eq!(cells, vec!["A2", "B2", "A3", "B3"]);
    }

    #[test]
    fn rectangle_size_covers_whole_sheets() {
        let at = |col, row| CellLocation::new(SheetId(0), LocalAddress::new(col, row));
        assert_eq!(rectangle_size(at(2, 2), at(1, 3)), 4);
        assert_eq!(rectangle_size(at(1, 1), at(16_384, 1_048_576)), 17_179_869_184);
    }
}
