//! Branches, loops and jumps. These mutate the driver's stacks rather than just
//! producing values.

use std::rc::Rc;

use xlm_model::NameValue;

use super::{CallSite, FunctionSpec};
use crate::emulator::{
    BranchFrame, CellMapState, Emulator, LoopRecord, PendingFormula, RangeCursor,
};
use crate::parser::Expr;
use crate::value::{EvalResult, EvalStatus, XlValue};

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec { name: "IF", min_args: 1, max_args: 3, implementation: if_fn },
    FunctionSpec { name: "WHILE", min_args: 1, max_args: 1, implementation: while_fn },
    FunctionSpec { name: "NEXT", min_args: 0, max_args: 0, implementation: next_fn },
    FunctionSpec { name: "FOR.CELL", min_args: 2, max_args: 3, implementation: for_cell_fn },
    FunctionSpec { name: "END.IF", min_args: 0, max_args: 0, implementation: end_if_fn },
    FunctionSpec { name: "GOTO", min_args: 1, max_args: 1, implementation: goto_fn },
    FunctionSpec { name: "RUN", min_args: 1, max_args: 2, implementation: goto_fn },
    FunctionSpec { name: "ON.TIME", min_args: 2, max_args: 4, implementation: on_time_fn },
    FunctionSpec { name: "HALT", min_args: 0, max_args: 1, implementation: halt_fn },
    FunctionSpec { name: "CLOSE", min_args: 0, max_args: 2, implementation: halt_fn },
    FunctionSpec { name: "RETURN", min_args: 0, max_args: 1, implementation: return_fn },
];

fn if_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let text = site.source_text();
    if em.state.branch_stack.iter().any(|frame| frame.origin == site.cell) {
        log::debug!("IF at {} re-entered while its branch is pending", site.cell.address);
        return EvalResult::new(EvalStatus::End, XlValue::Empty, format!("[[LOOP]]: {text}"));
    }

    let condition = em.arg(site, 0);
    if site.args.len() < 2 {
        // Block form: `IF(cond)` ... `END.IF`.
        em.state.indent_level += 1;
        let status = if condition.is_full() {
            EvalStatus::FullEvaluation
        } else {
            EvalStatus::PartialEvaluation
        };
        return EvalResult::new(status, XlValue::Empty, text);
    }

    let indent = em.state.indent_level;
    let push = |em: &mut Emulator<'_>, branch: &Expr, cells: CellMapState, tag: &str| {
        if matches!(branch, Expr::Missing) {
            return false;
        }
        em.state.branch_stack.push(BranchFrame {
            origin: site.cell,
            formula: PendingFormula::Expr(Rc::new(branch.clone())),
            cells,
            indent,
            tag: tag.to_string(),
        });
        true
    };

    if condition.is_full() {
        let truthy = condition.value.truthiness();
        let (branch, tag) = if truthy {
            (site.arg(1), "[TRUE]")
        } else {
            (site.arg(2), "[FALSE]")
        };
        if !push(em, branch, CellMapState::Shared, tag) {
            return EvalResult::full_with_text(XlValue::Bool(truthy), text);
        }
        log::debug!("IF at {} takes {tag}", site.cell.address);
        return EvalResult::new(EvalStatus::Branching, XlValue::Empty, text);
    }

    let snapshot = em.workbook.sheet(site.cell.sheet).cells.clone();
    push(em, site.arg(2), CellMapState::Owned(snapshot), "[FALSE]");
    push(em, site.arg(1), CellMapState::Shared, "[TRUE]");
    log::debug!("IF at {} is unresolved; exploring both branches", site.cell.address);
    EvalResult::new(EvalStatus::FullBranching, XlValue::Empty, text)
}

fn while_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let condition = em.arg(site, 0);
    let holds = condition.is_full() && condition.value.truthiness();
    em.state.loop_stack.push(LoopRecord {
        start: site.cell,
        condition: holds,
        cursor: None,
        indent: em.state.indent_level,
    });
    if !holds {
        em.state.begin_suppression();
    }
    em.state.indent_level += 1;
    log::debug!("WHILE at {} -> {holds}", site.cell.address);

    if condition.is_full() {
        let text = format!("{} -> [{}]", site.source_text(), condition.text);
        EvalResult::full_with_text(XlValue::Empty, text)
    } else {
        EvalResult::new(EvalStatus::PartialEvaluation, XlValue::Empty, site.source_text())
    }
}

fn next_fn(em: &mut Emulator<'_>, _site: &CallSite<'_>) -> EvalResult {
    let done = EvalResult::full_with_text(XlValue::Empty, "NEXT");
    let matches = em
        .state
        .loop_stack
        .last()
        .is_some_and(|top| top.indent + 1 == em.state.indent_level);
    if !matches {
        return done;
    }
    let Some(record) = em.state.loop_stack.pop() else {
        return done;
    };
    em.state.indent_level = record.indent;
    em.state.indent_current_line = true;
    if em
        .state
        .suppress_from
        .is_some_and(|depth| em.state.loop_stack.len() < depth)
    {
        em.state.suppress_from = None;
    }

    if !record.condition {
        return done;
    }
    let start = record.start;
    if record.cursor.is_some() {
        // FOR.CELL picks its cursor back up from the top of the stack.
        em.state.loop_stack.push(record);
    }
    done.with_next(em.formula_cell_at(start))
}

fn for_cell_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let variable = match site.arg(0) {
        Expr::Name(name) => name.clone(),
        other => em.evaluate(site.cell, other, false).unwrapped_text(),
    };

    let resumed = em
        .state
        .loop_stack
        .last()
        .is_some_and(|top| top.start == site.cell && top.cursor.is_some());
    if !resumed {
        let Some((start, end)) = em.range_arg(site, 1) else {
            return EvalResult::partial(site.source_text());
        };
        em.state.loop_stack.push(LoopRecord {
            start: site.cell,
            condition: true,
            cursor: Some(RangeCursor::new(start.sheet, start.address, end.address)),
            indent: em.state.indent_level,
        });
    }

    let next = match em.state.loop_stack.last_mut() {
        Some(LoopRecord {
            cursor: Some(cursor),
            ..
        }) => cursor.advance(&em.workbook),
        _ => None,
    };
    em.state.indent_level += 1;

    match next {
        Some(loc) => {
            let sheet = em.sheet_name(loc.sheet).to_string();
            em.workbook.names_mut().insert(
                &variable,
                NameValue::Reference {
                    sheet,
                    address: loc.address,
                },
            );
            let text = format!("{} -> [{}]", site.source_text(), em.location_text(loc));
            EvalResult::full_with_text(XlValue::Empty, text)
        }
        None => {
            if let Some(top) = em.state.loop_stack.last_mut() {
                top.condition = false;
            }
            em.state.begin_suppression();
            log::debug!("FOR.CELL at {} exhausted", site.cell.address);
            EvalResult::full_with_text(XlValue::Empty, site.source_text())
        }
    }
}

fn end_if_fn(em: &mut Emulator<'_>, _site: &CallSite<'_>) -> EvalResult {
    em.state.indent_level = em.state.indent_level.saturating_sub(1);
    em.state.indent_current_line = true;
    EvalResult::full_with_text(XlValue::Empty, "END.IF")
}

fn jump(em: &mut Emulator<'_>, site: &CallSite<'_>, target: usize) -> EvalResult {
    let Some(loc) = em.target_arg(site, target) else {
        return EvalResult::new(EvalStatus::End, XlValue::Empty, site.source_text());
    };
    let text = format!("{}({})", site.name.to_ascii_uppercase(), em.location_text(loc));
    match em.formula_cell_at(loc) {
        Some(next) => EvalResult::full_with_text(XlValue::Empty, text).with_next(Some(next)),
        None => EvalResult::new(EvalStatus::End, XlValue::Empty, text),
    }
}

fn goto_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    jump(em, site, 0)
}

fn on_time_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    jump(em, site, 1)
}

fn halt_fn(_em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    EvalResult::new(EvalStatus::End, XlValue::Empty, site.source_text())
}

fn return_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let value = site.has_arg(0).then(|| em.arg(site, 0));
    let text = match &value {
        Some(value) => format!("RETURN({})", value.text),
        None => "RETURN()".to_string(),
    };
    let Some(caller) = em.state.call_stack.pop() else {
        return EvalResult::new(EvalStatus::End, XlValue::Empty, text);
    };
    if let Some(value) = value.filter(EvalResult::is_full) {
        em.set_cell(caller, &value.value.to_string(), true);
    }
    let next = em.formula_cell_at(caller.below());
    EvalResult::full_with_text(XlValue::Empty, text).with_next(next)
}
