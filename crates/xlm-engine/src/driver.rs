//! The control-flow walk: entry points, branch exploration, cycle detection and output
//! filtering.
//!
//! Execution is a flat cell-to-cell walk. Each step evaluates one formula, records the
//! outcome as a [`TraceStep`], and picks the next cell from the result (an explicit jump) or
//! from the row below (fall-through). Paths end at `HALT`, at a cell with no formula below
//! it, or when a cycle is detected; pending `IF` branches are then resumed in LIFO order.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use xlm_model::{parse_cell_address, CellLocation, LocalAddress, NameValue};

use crate::emulator::{CellMapState, Emulator, PendingFormula};
use crate::error::EngineError;
use crate::oracle::{has_loop, UnknownValueRequest};
use crate::parser::Expr;
use crate::value::{unwrap_str_literal, EvalResult, EvalStatus};

/// One reported evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub sheet: String,
    pub address: LocalAddress,
    pub status: EvalStatus,
    pub text: String,
    pub indent: usize,
    #[serde(skip)]
    pub location: CellLocation,
}

/// A path position waiting to be evaluated.
struct Cursor {
    location: CellLocation,
    formula: PendingFormula,
    /// First step after an entry or a branch resume.
    first: bool,
    tag: String,
}

fn string_literal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(?:[^"]|"")*""#).expect("static string pattern compiles"))
}

/// String literals in a piece of trace text, unquoted.
fn extract_strings(text: &str) -> Vec<String> {
    string_literal_regex()
        .find_iter(text)
        .map(|m| unwrap_str_literal(m.as_str()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lazy iterator over the trace of one run. Created by [`Emulator::deobfuscate`].
pub struct Deobfuscation<'a, 's> {
    emulator: &'a mut Emulator<'s>,
    entries: VecDeque<(String, String)>,
    current: Option<Cursor>,
    observed: Vec<CellLocation>,
    pending: VecDeque<TraceStep>,
    steps: usize,
    stopped: bool,
}

impl<'a, 's> Deobfuscation<'a, 's> {
    pub(crate) fn new(emulator: &'a mut Emulator<'s>) -> Self {
        let entries = entry_points(emulator);
        if entries.is_empty() {
            log::warn!("no entry point: define auto_open or pass a start point");
        }
        Self {
            emulator,
            entries: entries.into(),
            current: None,
            observed: Vec::new(),
            pending: VecDeque::new(),
            steps: 0,
            stopped: false,
        }
    }

    /// Pick the next path to walk: a pending branch first, then the next entry point.
    fn resume(&mut self) -> bool {
        let em = &mut *self.emulator;
        if let Some(frame) = em.state.branch_stack.pop() {
            if let CellMapState::Owned(cells) = frame.cells {
                em.workbook.sheet_mut(frame.origin.sheet).cells = cells;
            }
            em.state.indent_level = frame.indent;
            log::debug!(
                "resuming {} branch of {}",
                frame.tag,
                em.location_text(frame.origin)
            );
            self.current = Some(Cursor {
                location: frame.origin,
                formula: frame.formula,
                first: true,
                tag: frame.tag,
            });
            return true;
        }

        while let Some((label, target)) = self.entries.pop_front() {
            match self.start_entry(&label, &target) {
                Ok(cursor) => {
                    log::info!("starting at {label} ({target})");
                    self.current = Some(cursor);
                    return true;
                }
                Err(err) => log::warn!("{err}"),
            }
        }
        false
    }

    fn start_entry(&mut self, label: &str, target: &str) -> Result<Cursor, EngineError> {
        let em = &mut *self.emulator;
        let entry_error = || EngineError::EntryPoint {
            label: label.to_string(),
            target: target.to_string(),
        };
        let address = parse_cell_address(target).ok_or_else(entry_error)?;
        let sheet = match &address.sheet {
            Some(name) => em
                .workbook
                .sheet_id(name)
                .ok_or_else(|| EngineError::UnknownSheet(name.clone()))?,
            None => em
                .workbook
                .macrosheets()
                .next()
                .map(|(id, _)| id)
                .ok_or_else(entry_error)?,
        };
        let location = em
            .formula_cell_at(CellLocation::new(sheet, address.local))
            .ok_or_else(entry_error)?;
        let formula = em
            .workbook
            .cell(location)
            .and_then(|cell| cell.formula.clone())
            .ok_or_else(entry_error)?;

        em.state.branch_stack.clear();
        em.state.loop_stack.clear();
        em.state.suppress_from = None;
        em.state.indent_level = 0;
        self.observed.clear();
        Ok(Cursor {
            location,
            formula: PendingFormula::Text(formula),
            first: true,
            tag: String::new(),
        })
    }

    /// Evaluate the cursor's formula, retrying with operator input when a cell it read
    /// was never resolved.
    fn evaluate_with_shell(&mut self, location: CellLocation, expr: &Expr) -> EvalResult {
        let em = &mut *self.emulator;
        let interactive = em.config.interactive && em.shell.is_some();
        loop {
            let result = if em.state.suppressing() {
                em.evaluate_suppressed(location, expr)
            } else {
                em.evaluate(location, expr, interactive)
            };
            let Some(unknown) = em.state.unknown_cell.take() else {
                return result;
            };
            if !interactive {
                return result;
            }
            let request = UnknownValueRequest {
                current_cell: em.location_text(location),
                formula: em.workbook.cell(location).and_then(|c| c.formula.clone()),
                unknown_cell: em.location_text(unknown),
                partial_text: result.text.clone(),
            };
            let answer = em
                .shell
                .as_mut()
                .and_then(|shell| shell.provide_value(&request));
            let Some(answer) = answer else {
                return result;
            };
            log::info!("operator set {} to {answer:?}", request.unknown_cell);
            em.set_cell(unknown, &answer, false);
            em.state.failed_writes.remove(&unknown);
        }
    }

    /// Run one step of the current path, queueing whatever it reports.
    fn step(&mut self, cursor: Cursor) {
        let location = cursor.location;
        {
            let state = &mut self.emulator.state;
            state.indent_current_line = false;
            state.evict_current_formula = false;
            state.unknown_cell = None;
        }

        let expr = match &cursor.formula {
            PendingFormula::Expr(expr) => Rc::clone(expr),
            PendingFormula::Text(text) => match self.emulator.parse_cached(text) {
                Ok(expr) => expr,
                Err(source) => {
                    let err = EngineError::Parse {
                        cell: self.emulator.location_text(location),
                        source,
                    };
                    log::warn!("skipping path: {err}");
                    return;
                }
            },
        };

        let indent = self.emulator.state.indent_level;
        let mut previous_indent = if cursor.first {
            indent.saturating_sub(1)
        } else {
            indent
        };

        let mut result = self.evaluate_with_shell(location, &expr);
        let em = &mut *self.emulator;
        self.steps += 1;

        if let Some(cell) = em.workbook.cell_mut(location) {
            cell.visits += 1;
        }
        if em.state.evict_current_formula {
            if let PendingFormula::Text(text) = &cursor.formula {
                log::debug!("evicting cached parse of {}", em.location_text(location));
                em.state.formula_cache.remove(text);
            }
        }

        if cursor.first && !cursor.tag.is_empty() {
            result.text = format!("{} {}", cursor.tag, result.text).trim().to_string();
        }

        if em.state.loop_stack.is_empty() && result.text != "NEXT" {
            self.observed.push(location);
            let history = em.config.loop_history.max(2 * em.config.loop_window);
            if self.observed.len() > 2 * history {
                self.observed.drain(..self.observed.len() - history);
            }
            if has_loop(&self.observed, em.config.loop_window) {
                log::info!("cycle detected at {}", em.location_text(location));
                let text = format!("[[LOOP]]: {}", result.text);
                let step = trace_step(em, location, EvalStatus::End, text, previous_indent);
                self.pending.push_back(step);
                return;
            }
        }

        if result.is_full() && !result.value.is_empty() {
            if let Some(cell) = em.workbook.cell_mut(location) {
                cell.value = Some(result.value.to_string());
            }
        }

        let next = match result.next_cell {
            Some(next) => Some(next),
            None if result.status.falls_through() => em.formula_cell_at(location.below()),
            None => None,
        };

        if em.state.indent_current_line {
            previous_indent = em.state.indent_level;
        }

        let configured = em.config.output_level;
        if configured >= 3 {
            if result.output_level == 2 {
                let strings = extract_strings(&result.text);
                if !strings.is_empty() {
                    let text = strings.join("\n");
                    let step = trace_step(em, location, result.status, text, previous_indent);
                    self.pending.push_back(step);
                }
            }
        } else if result.output_level >= configured {
            let step = trace_step(em, location, result.status, result.text, previous_indent);
            self.pending.push_back(step);
        }

        self.current = next.and_then(|location| {
            let formula = em.workbook.cell(location)?.formula.clone()?;
            Some(Cursor {
                location,
                formula: PendingFormula::Text(formula),
                first: false,
                tag: String::new(),
            })
        });
    }
}

fn trace_step(
    em: &Emulator<'_>,
    location: CellLocation,
    status: EvalStatus,
    text: String,
    indent: usize,
) -> TraceStep {
    TraceStep {
        sheet: em.sheet_name(location.sheet).to_string(),
        address: location.address,
        status,
        text,
        indent,
        location,
    }
}

/// `(label, target)` pairs to start from, in order: `auto_open*` names, `auto_close*` names,
/// then the configured start point, then whatever the shell answers.
fn entry_points(em: &mut Emulator<'_>) -> Vec<(String, String)> {
    let names = em.workbook.names();
    let mut entries: Vec<(String, String)> = ["auto_open", "auto_close"]
        .iter()
        .flat_map(|prefix| names.matching(prefix, false))
        .map(|(label, value)| (label.to_string(), entry_target(value)))
        .collect();
    if entries.is_empty() {
        if let Some(start) = em.config.start_point.clone() {
            entries.push(("auto_open".to_string(), start));
        } else if em.config.interactive {
            if let Some(start) = em.shell.as_mut().and_then(|shell| shell.entry_point()) {
                entries.push(("auto_open".to_string(), start.trim().to_string()));
            }
        }
    }
    entries
}

fn entry_target(value: &NameValue) -> String {
    match value {
        NameValue::Text(text) => text.trim_start_matches('=').to_string(),
        other => other.to_string(),
    }
}

impl Iterator for Deobfuscation<'_, '_> {
    type Item = TraceStep;

    fn next(&mut self) -> Option<TraceStep> {
        loop {
            if let Some(step) = self.pending.pop_front() {
                return Some(step);
            }
            if self.stopped {
                return None;
            }
            if self.emulator.timed_out() {
                log::info!("timeout reached after {} steps", self.steps);
                self.stopped = true;
                continue;
            }
            let cursor = match self.current.take() {
                Some(cursor) => cursor,
                None => {
                    if !self.resume() {
                        log::info!("emulation finished after {} steps", self.steps);
                        self.stopped = true;
                    }
                    continue;
                }
            };
            self.step(cursor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatorConfig;
    use pretty_assertions::assert_eq;
    use xlm_model::{FixtureSheet, FixtureWorkbook};

    #[test]
    fn cycle_history_keeps_a_bounded_tail() {
        let sheet = (1..=150).fold(FixtureSheet::macrosheet("Macro1"), |sheet, row| {
            sheet.formula(&format!("A{row}"), "=1+1")
        });
        let fixture = FixtureWorkbook::new("long.xlsm")
            .sheet(sheet)
            .defined_name("auto_open", "Macro1!$A$1");
        let config = EmulatorConfig::default().with_loop_history(25);
        let mut emulator = Emulator::new(&fixture).with_config(config);
        let mut run = emulator.deobfuscate();

        let mut seen = 0;
        while run.next().is_some() {
            seen += 1;
            assert!(run.observed.len() <= 50, "{} entries kept", run.observed.len());
        }
        assert_eq!(seen, 150);
    }

    #[test]
    fn extracts_unquoted_string_literals() {
        assert_eq!(
            extract_strings(r#"CALL("urlmon","URLDownloadToFileA","JJCCJJ",0,"http://x/""a""")"#),
            vec![
                "urlmon".to_string(),
                "URLDownloadToFileA".to_string(),
                "JJCCJJ".to_string(),
                "http://x/\"a\"".to_string(),
            ]
        );
        assert!(extract_strings("GOTO(Macro1!A5)").is_empty());
    }
}
