//! Expression evaluation over the live workbook.

mod operators;

use xlm_model::{CellLocation, LocalAddress, NameValue};

use crate::emulator::{Emulator, SelectedRange};
use crate::parser::{parse_formula, Axis, CellReference, Expr, RangeExpr, RefKind, UnaryOp};
use crate::value::{format_number, wrap_str_literal, EvalResult, EvalStatus, XlValue};

fn resolve_axis(axis: Axis, current: u32) -> Option<u32> {
    match axis {
        Axis::Current => Some(current),
        Axis::Absolute(n) => Some(n),
        Axis::Relative(d) => u32::try_from(i64::from(current) + d).ok().filter(|n| *n > 0),
    }
}

impl Emulator<'_> {
    pub(crate) fn evaluate(
        &mut self,
        cell: CellLocation,
        expr: &Expr,
        interactive: bool,
    ) -> EvalResult {
        match expr {
            Expr::Number(n) => {
                EvalResult::full_with_text(XlValue::Number(n.value), format_number(n.value))
            }
            Expr::Text(s) => EvalResult::full(XlValue::text(s.clone())),
            Expr::Bool(b) => EvalResult::full(XlValue::Bool(*b)),
            Expr::Error(e) => EvalResult::full_with_text(XlValue::text(e.clone()), e.clone()),
            Expr::Name(name) | Expr::SheetName { name, .. } => {
                self.evaluate_name(cell, name, interactive)
            }
            Expr::Cell(reference) => self.evaluate_cell_reference(cell, reference, interactive),
            Expr::Range(range) => self.evaluate_range(cell, range, expr),
            Expr::Array(rows) => {
                let items = rows
                    .iter()
                    .flatten()
                    .map(|item| self.evaluate(cell, item, false).value)
                    .collect();
                EvalResult::full_with_text(XlValue::List(items), expr.to_string())
            }
            Expr::Call(call) => self.evaluate_call(cell, call, expr, interactive),
            Expr::Unary { op, expr: inner } => {
                let result = self.evaluate(cell, inner, interactive);
                match op {
                    UnaryOp::Plus => result,
                    UnaryOp::Minus => match (result.is_full(), result.value.as_number()) {
                        (true, Some(n)) => EvalResult::full_with_text(
                            XlValue::Number(-n),
                            format_number(-n),
                        ),
                        _ => EvalResult::partial(format!("-{}", result.text)),
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.evaluate(cell, left, interactive);
                let right = self.evaluate(cell, right, interactive);
                self.apply_binary(*op, left, right)
            }
            Expr::Paren(inner) => {
                let mut result = self.evaluate(cell, inner, interactive);
                if !result.is_full() {
                    result.text = format!("({})", result.text);
                }
                result
            }
            Expr::Missing => EvalResult::full_with_text(XlValue::Empty, ""),
        }
    }

    /// Resolve a reference relative to `base`, with R1C1 axes measured from it.
    pub(crate) fn resolve_reference(
        &self,
        base: CellLocation,
        reference: &CellReference,
    ) -> Option<CellLocation> {
        let address = match reference.kind {
            RefKind::A1 { col, row, .. } => LocalAddress::new(col, row),
            RefKind::R1C1 { row, col } => LocalAddress::new(
                resolve_axis(col, base.address.col)?,
                resolve_axis(row, base.address.row)?,
            ),
        };
        self.locate(reference.sheet.as_deref(), base.sheet, address)
    }

    fn evaluate_name(&mut self, cell: CellLocation, name: &str, interactive: bool) -> EvalResult {
        let Some(bound) = self.workbook.names().get(name).cloned() else {
            return EvalResult::full_with_text(XlValue::text(name), name);
        };
        self.state.evict_current_formula = true;
        match bound {
            NameValue::Number(n) => EvalResult::full(XlValue::Number(n)),
            NameValue::List(items) => {
                let items = items.iter().map(|s| XlValue::from_cell_text(s)).collect();
                EvalResult::full(XlValue::List(items))
            }
            NameValue::Reference { sheet, address } => {
                let Some(target) = self.locate(Some(&sheet), cell.sheet, address) else {
                    return EvalResult::partial(name);
                };
                self.nested(|em| em.read_cell(target, name, interactive))
                    .unwrap_or_else(|| EvalResult::partial(name))
            }
            NameValue::Text(raw) => {
                let formula = format!("={}", raw.trim_start_matches('='));
                match parse_formula(&formula, self.syntax) {
                    Ok(expr) => self
                        .nested(|em| em.evaluate(cell, &expr, interactive))
                        .unwrap_or_else(|| EvalResult::partial(name)),
                    Err(_) => EvalResult::full(XlValue::Text(raw)),
                }
            }
        }
    }

    fn evaluate_cell_reference(
        &mut self,
        cell: CellLocation,
        reference: &CellReference,
        interactive: bool,
    ) -> EvalResult {
        let display = reference.to_string();
        match self.resolve_reference(cell, reference) {
            Some(target) => self.read_cell(target, &display, interactive),
            None => EvalResult::partial(display),
        }
    }

    /// Value of a cell as seen from a formula: stale formulas are re-evaluated in place.
    pub(crate) fn read_cell(
        &mut self,
        target: CellLocation,
        display: &str,
        interactive: bool,
    ) -> EvalResult {
        let Some(found) = self.workbook.cell(target) else {
            if self.state.failed_writes.contains(&target) {
                if interactive && self.state.unknown_cell.is_none() {
                    self.state.unknown_cell = Some(target);
                }
                return EvalResult::new(EvalStatus::PartialEvaluation, XlValue::Empty, display);
            }
            return EvalResult::full_with_text(XlValue::text(""), "");
        };

        if found.needs_evaluation() {
            let formula = found.formula.clone().unwrap_or_default();
            return match self.parse_cached(&formula) {
                Ok(expr) => self
                    .nested(|em| em.evaluate(target, &expr, false))
                    .unwrap_or_else(|| EvalResult::partial(display)),
                Err(_) => EvalResult::full_with_text(
                    XlValue::text(formula.clone()),
                    wrap_str_literal(&formula, false),
                ),
            };
        }
        match &found.value {
            Some(value) => EvalResult::full_with_text(
                XlValue::from_cell_text(value),
                wrap_str_literal(value, true),
            ),
            None => EvalResult::new(EvalStatus::PartialEvaluation, XlValue::Empty, display),
        }
    }

    fn evaluate_range(&mut self, cell: CellLocation, range: &RangeExpr, expr: &Expr) -> EvalResult {
        let text = expr.to_string();
        let Some(start) = self.resolve_reference(cell, &range.start) else {
            return EvalResult::partial(text);
        };
        let mut end_ref = range.end.clone();
        if end_ref.sheet.is_none() {
            end_ref.sheet = Some(self.sheet_name(start.sheet).to_string());
        }
        let base = CellLocation::new(start.sheet, cell.address);
        let Some(end) = self.resolve_reference(base, &end_ref) else {
            return EvalResult::partial(text);
        };
        let selected = range
            .selected
            .as_ref()
            .and_then(|r| self.resolve_reference(base, r));
        self.state.selected_range = Some(SelectedRange {
            start,
            end,
            selected,
        });
        let canonical = format!("{}:{}", self.location_text(start), end.address);
        EvalResult::full_with_text(XlValue::Text(canonical), text)
    }
}
