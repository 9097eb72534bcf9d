//! Built-in function table and call dispatch.
//!
//! Each handler module exposes a static table of [`FunctionSpec`]s. Names are matched
//! case-insensitively, `_xlfn.` prefixes are ignored, and library-qualified native calls
//! (`Kernel32.VirtualAlloc`) resolve through the native table by procedure name.

mod control;
mod info;
mod io;
mod math;
mod sheet;
mod text;

use std::collections::HashMap;
use std::sync::OnceLock;

use xlm_model::{parse_range_address, CellLocation, NameValue};

use crate::emulator::{Emulator, LoopRecord};
use crate::parser::{Call, Callee, Expr};
use crate::value::{unwrap_str_literal, EvalResult, EvalStatus, XlValue};

pub(crate) type Handler = fn(&mut Emulator<'_>, &CallSite<'_>) -> EvalResult;

#[derive(Debug)]
pub(crate) struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub implementation: Handler,
}

/// Everything a handler sees about one call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallSite<'a> {
    pub cell: CellLocation,
    /// Name the call dispatched under (after alias resolution).
    pub name: &'a str,
    pub args: &'a [Expr],
    pub expr: &'a Expr,
    pub interactive: bool,
}

static MISSING: Expr = Expr::Missing;

impl<'a> CallSite<'a> {
    /// Argument `i`, or an omitted argument past the end.
    pub fn arg(&self, i: usize) -> &'a Expr {
        self.args.get(i).unwrap_or(&MISSING)
    }

    pub fn has_arg(&self, i: usize) -> bool {
        !matches!(self.arg(i), Expr::Missing)
    }

    /// The call as written.
    pub fn source_text(&self) -> String {
        self.expr.to_string()
    }
}

fn registry() -> &'static HashMap<String, &'static FunctionSpec> {
    static REGISTRY: OnceLock<HashMap<String, &'static FunctionSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let tables: [&'static [FunctionSpec]; 6] = [
            control::FUNCTIONS,
            info::FUNCTIONS,
            io::FUNCTIONS,
            math::FUNCTIONS,
            sheet::FUNCTIONS,
            text::FUNCTIONS,
        ];
        let mut map = HashMap::new();
        for spec in tables.into_iter().flatten() {
            map.insert(spec.name.to_ascii_uppercase(), spec);
        }
        map
    })
}

fn native_registry() -> &'static HashMap<String, &'static FunctionSpec> {
    static REGISTRY: OnceLock<HashMap<String, &'static FunctionSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        io::NATIVE
            .iter()
            .map(|spec| (spec.name.to_ascii_uppercase(), spec))
            .collect()
    })
}

pub(crate) fn lookup_function(name: &str) -> Option<&'static FunctionSpec> {
    let upper = name.to_ascii_uppercase();
    if let Some(spec) = registry().get(&upper).copied() {
        return Some(spec);
    }

    if let Some(stripped) = upper.strip_prefix("_XLFN.") {
        if let Some(spec) = registry().get(stripped).copied() {
            return Some(spec);
        }
    }

    // `Kernel32.VirtualAlloc`, `ntdll.RtlCopyMemory`, ...
    let (_, proc_name) = upper.rsplit_once('.')?;
    native_registry().get(proc_name).copied()
}

/// Trace verbosity class of a built-in: jumps are 0, side-effecting calls 2, the rest 1.
fn output_level(name: &str) -> u8 {
    match name {
        "GOTO" | "RUN" => 0,
        "CALL" | "FOPEN" | "FWRITE" | "FWRITELN" | "FREAD" | "REGISTER" | "IF" | "WHILE"
        | "HALT" | "CLOSE" | "NEXT" => 2,
        _ => 1,
    }
}

impl Emulator<'_> {
    pub(crate) fn evaluate_call(
        &mut self,
        cell: CellLocation,
        call: &Call,
        expr: &Expr,
        interactive: bool,
    ) -> EvalResult {
        match &call.callee {
            Callee::Expr(inner) => {
                let target = self.evaluate(cell, inner, false);
                match self.value_location(cell, &target.value) {
                    Some(loc) if target.is_full() => self.call_subroutine(cell, loc, expr),
                    _ => EvalResult::partial(expr.to_string()),
                }
            }
            Callee::Cell(reference) => match self.resolve_reference(cell, reference) {
                Some(loc) => self.call_subroutine(cell, loc, expr),
                None => EvalResult::partial(expr.to_string()),
            },
            Callee::Name(name) | Callee::SheetName { name, .. } => {
                let site = CallSite {
                    cell,
                    name,
                    args: &call.args,
                    expr,
                    interactive,
                };
                self.call_named(&site)
            }
        }
    }

    fn call_named(&mut self, site: &CallSite<'_>) -> EvalResult {
        if let Some(spec) = lookup_function(site.name) {
            return self.dispatch(spec, site);
        }

        let alias = self
            .state
            .registered
            .get(&site.name.to_ascii_lowercase())
            .map(|r| r.target.clone());
        if let Some(target) = alias {
            let aliased = CallSite {
                name: &target,
                ..*site
            };
            return match lookup_function(&target) {
                Some(spec) => self.dispatch(spec, &aliased),
                None => self.generic_call(&aliased),
            };
        }

        if let Some(loc) = self.label_location(site.cell, site.name) {
            return self.call_subroutine(site.cell, loc, site.expr);
        }
        self.generic_call(site)
    }

    fn dispatch(&mut self, spec: &'static FunctionSpec, site: &CallSite<'_>) -> EvalResult {
        let count = site.args.len();
        if count < spec.min_args || count > spec.max_args {
            log::debug!(
                "{} called with {count} arguments (expects {}..={})",
                spec.name,
                spec.min_args,
                spec.max_args
            );
            return EvalResult::error(site.source_text());
        }
        let mut result = (spec.implementation)(self, site);
        result.output_level = output_level(spec.name);
        result
    }

    /// Unknown functions: evaluate every argument and render the call with what resolved.
    fn generic_call(&mut self, site: &CallSite<'_>) -> EvalResult {
        let rendered: Vec<String> = site
            .args
            .iter()
            .map(|arg| self.evaluate(site.cell, arg, false).text)
            .collect();
        let mut result = EvalResult::partial(format!("{}({})", site.name, rendered.join(",")));
        result.output_level = 1;
        result
    }

    /// Jump into a macro cell, remembering the caller for `RETURN`.
    fn call_subroutine(
        &mut self,
        caller: CellLocation,
        target: CellLocation,
        expr: &Expr,
    ) -> EvalResult {
        let text = expr.to_string();
        match self.formula_cell_at(target) {
            Some(next) => {
                log::debug!("call {} from {}", self.location_text(next), caller.address);
                self.state.call_stack.push(caller);
                EvalResult::full_with_text(XlValue::Empty, text).with_next(Some(next))
            }
            None => EvalResult::error(text),
        }
    }

    /// A defined name bound to a macrosheet cell, for call-by-label.
    fn label_location(&self, base: CellLocation, name: &str) -> Option<CellLocation> {
        let (sheet, address) = self.workbook.names().get(name)?.as_reference()?;
        let loc = self.locate(sheet.as_deref(), base.sheet, address)?;
        self.workbook
            .sheet(loc.sheet)
            .is_macrosheet()
            .then_some(loc)
    }

    /// Cell a value points at: a reference, or text that reads as an address.
    pub(crate) fn value_location(&self, base: CellLocation, value: &XlValue) -> Option<CellLocation> {
        match value {
            XlValue::Reference { sheet, address } => self.locate(Some(sheet), base.sheet, *address),
            XlValue::Text(text) => {
                let range = parse_range_address(&unwrap_str_literal(text))?;
                self.locate(range.sheet.as_deref(), base.sheet, range.start)
            }
            _ => None,
        }
    }

    pub(crate) fn arg(&mut self, site: &CallSite<'_>, i: usize) -> EvalResult {
        self.evaluate(site.cell, site.arg(i), site.interactive)
    }

    /// Argument `i` read as a cell range without evaluating cell contents.
    ///
    /// Accepts literal references and ranges, names bound to references, and expressions
    /// whose value is a reference or address text. Single cells come back as 1x1 ranges.
    pub(crate) fn range_arg(
        &mut self,
        site: &CallSite<'_>,
        i: usize,
    ) -> Option<(CellLocation, CellLocation)> {
        self.range_of(site.cell, site.arg(i))
    }

    pub(crate) fn range_of(
        &mut self,
        cell: CellLocation,
        expr: &Expr,
    ) -> Option<(CellLocation, CellLocation)> {
        match expr {
            Expr::Missing => None,
            Expr::Cell(reference) => {
                let loc = self.resolve_reference(cell, reference)?;
                Some((loc, loc))
            }
            Expr::Range(_) => {
                let result = self.evaluate(cell, expr, false);
                if !result.is_full() {
                    return None;
                }
                let selected = self.state.selected_range?;
                Some((selected.start, selected.end))
            }
            Expr::Paren(inner) => self.range_of(cell, inner),
            Expr::Name(name) | Expr::SheetName { name, .. } => {
                match self.workbook.names().get(name).cloned() {
                    Some(NameValue::Reference { sheet, address }) => {
                        let loc = self.locate(Some(&sheet), cell.sheet, address)?;
                        Some((loc, loc))
                    }
                    Some(NameValue::Text(raw)) => self.range_of_text(cell, &raw),
                    _ => None,
                }
            }
            _ => {
                let result = self.evaluate(cell, expr, false);
                if !result.is_full() {
                    return None;
                }
                match &result.value {
                    XlValue::Reference { sheet, address } => {
                        let loc = self.locate(Some(sheet), cell.sheet, *address)?;
                        Some((loc, loc))
                    }
                    XlValue::Text(text) => self.range_of_text(cell, text),
                    _ => None,
                }
            }
        }
    }

    pub(crate) fn range_of_text(&self, base: CellLocation, text: &str) -> Option<(CellLocation, CellLocation)> {
        let range = parse_range_address(&unwrap_str_literal(text))?;
        let start = self.locate(range.sheet.as_deref(), base.sheet, range.start)?;
        Some((start, CellLocation::new(start.sheet, range.end)))
    }

    /// Argument `i` read as a single target cell (the first cell of a range).
    pub(crate) fn target_arg(&mut self, site: &CallSite<'_>, i: usize) -> Option<CellLocation> {
        self.range_arg(site, i).map(|(start, _)| start)
    }

    /// Evaluation inside a loop body that is being skipped.
    ///
    /// `NEXT` still runs so the matching loop can close, and nested loop headers push
    /// inert records so their own `NEXT` pairs with them instead of the outer loop.
    pub(crate) fn evaluate_suppressed(&mut self, cell: CellLocation, expr: &Expr) -> EvalResult {
        let name = match expr {
            Expr::Call(call) => call.name().map(str::to_ascii_uppercase),
            _ => None,
        };
        match name.as_deref() {
            Some("NEXT") => self.evaluate(cell, expr, false),
            Some("WHILE" | "FOR.CELL") => {
                self.state.loop_stack.push(LoopRecord {
                    start: cell,
                    condition: false,
                    cursor: None,
                    indent: self.state.indent_level,
                });
                self.state.indent_level += 1;
                EvalResult::new(EvalStatus::Ignored, XlValue::Empty, expr.to_string())
            }
            _ => EvalResult::new(EvalStatus::Ignored, XlValue::Empty, expr.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_strips_prefixes() {
        assert_eq!(lookup_function("char").map(|s| s.name), Some("CHAR"));
        assert_eq!(lookup_function("_xlfn.ARABIC").map(|s| s.name), Some("ARABIC"));
        assert_eq!(
            lookup_function("Kernel32.VirtualAlloc").map(|s| s.name),
            Some("VIRTUALALLOC")
        );
        assert!(lookup_function("NOT.A.FUNCTION").is_none());
        assert!(lookup_function("VirtualAlloc").is_none());
    }

    #[test]
    fn output_levels() {
        assert_eq!(output_level("GOTO"), 0);
        assert_eq!(output_level("FWRITELN"), 2);
        assert_eq!(output_level("CHAR"), 1);
    }
}
