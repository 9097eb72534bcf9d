use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use xlm_engine::{Emulator, EvalStatus, TraceStep};
use xlm_model::{CellLocation, FixtureSheet, FixtureWorkbook, LocalAddress};

fn macro_workbook(sheet: FixtureSheet) -> FixtureWorkbook {
    FixtureWorkbook::new("loops.xlsm")
        .sheet(sheet)
        .defined_name("auto_open", "Macro1!$A$1")
}

fn cell_value(emulator: &Emulator<'_>, a1: &str) -> Option<String> {
    let workbook = emulator.workbook();
    let sheet = workbook.sheet_id("Macro1")?;
    let address = LocalAddress::from_a1(a1).ok()?;
    workbook.cell(CellLocation::new(sheet, address))?.value.clone()
}

fn addresses(steps: &[TraceStep]) -> Vec<String> {
    steps.iter().map(|s| s.address.to_a1()).collect()
}

fn statuses_at(steps: &[TraceStep], a1: &str) -> Vec<EvalStatus> {
    steps
        .iter()
        .filter(|s| s.address.to_a1() == a1)
        .map(|s| s.status)
        .collect()
}

#[test]
fn resolved_if_takes_one_branch() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", r#"=IF(1=1,FORMULA("t",B1),FORMULA("f",B1))"#)
            .formula("A2", "=HALT()"),
    );
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(
        steps.iter().map(|s| s.status).collect::<Vec<_>>(),
        vec![EvalStatus::Branching, EvalStatus::FullEvaluation, EvalStatus::End]
    );
    assert_eq!(steps[1].text, r#"[TRUE] FORMULA("t",B1)"#);
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("t"));
}

#[test]
fn unresolved_if_explores_both_branches_from_the_same_grid() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", r#"=IF(UNKNOWN.FN(1),FORMULA("t",C1),FORMULA("f",B1))"#)
            .formula("A2", r#"=FORMULA(C1&"x",D1)"#)
            .formula("A3", "=HALT()"),
    );
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(
        addresses(&steps),
        vec!["A1", "A1", "A2", "A3", "A1", "A2", "A3"]
    );
    assert_eq!(steps[0].status, EvalStatus::FullBranching);
    assert_eq!(steps[1].text, r#"[TRUE] FORMULA("t",C1)"#);
    assert_eq!(steps[2].text, r#"FORMULA("tx",D1)"#);
    assert_eq!(steps[4].text, r#"[FALSE] FORMULA("f",B1)"#);
    // The false branch starts from the grid as it was before the true branch wrote C1.
    assert_eq!(steps[5].text, r#"FORMULA("x",D1)"#);
    assert_eq!(cell_value(&emulator, "C1"), None);
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("f"));
}

#[test]
fn false_while_skips_its_body() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", "=WHILE(FALSE)")
            .formula("A2", r#"=FORMULA("body",B1)"#)
            .formula("A3", "=NEXT()")
            .formula("A4", r#"=FORMULA("after",B2)"#)
            .formula("A5", "=HALT()"),
    );
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(addresses(&steps), vec!["A1", "A2", "A3", "A4", "A5"]);
    assert_eq!(steps[1].status, EvalStatus::Ignored);
    assert_eq!(cell_value(&emulator, "B1"), None);
    assert_eq!(cell_value(&emulator, "B2").as_deref(), Some("after"));
}

#[test]
fn loops_nested_in_a_skipped_body_pair_with_their_own_next() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", "=WHILE(FALSE)")
            .formula("A2", "=WHILE(TRUE)")
            .formula("A3", r#"=FORMULA("inner",B1)"#)
            .formula("A4", "=NEXT()")
            .formula("A5", r#"=FORMULA("outer",B2)"#)
            .formula("A6", "=NEXT()")
            .formula("A7", r#"=FORMULA("after",B3)"#)
            .formula("A8", "=HALT()"),
    );
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(
        addresses(&steps),
        vec!["A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8"]
    );
    let statuses: Vec<_> = steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            EvalStatus::FullEvaluation,
            EvalStatus::Ignored,
            EvalStatus::Ignored,
            EvalStatus::FullEvaluation,
            EvalStatus::Ignored,
            EvalStatus::FullEvaluation,
            EvalStatus::FullEvaluation,
            EvalStatus::End,
        ]
    );
    assert_eq!(cell_value(&emulator, "B1"), None);
    assert_eq!(cell_value(&emulator, "B2"), None);
    assert_eq!(cell_value(&emulator, "B3").as_deref(), Some("after"));
}

#[test]
fn while_loop_runs_until_its_condition_fails() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", "=WHILE(C1<3)")
            .formula("A2", "=SET.VALUE(C1,C1+1)")
            .formula("A3", "=NEXT()")
            .formula("A4", "=HALT()"),
    );
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(cell_value(&emulator, "C1").as_deref(), Some("3"));
    assert_eq!(
        statuses_at(&steps, "A2"),
        vec![
            EvalStatus::FullEvaluation,
            EvalStatus::FullEvaluation,
            EvalStatus::FullEvaluation,
            EvalStatus::Ignored,
        ]
    );
    assert_eq!(steps.last().map(|s| s.status), Some(EvalStatus::End));
}

#[test]
fn for_cell_visits_each_populated_cell() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .value("B1", "x")
            .value("B2", "y")
            .formula("A1", "=FOR.CELL(cur,B1:B2)")
            .formula("A2", "=SET.VALUE(D1,D1&cur)")
            .formula("A3", "=NEXT()")
            .formula("A4", "=HALT()"),
    );
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(cell_value(&emulator, "D1").as_deref(), Some("xy"));
    assert_eq!(
        statuses_at(&steps, "A2"),
        vec![
            EvalStatus::FullEvaluation,
            EvalStatus::FullEvaluation,
            EvalStatus::Ignored,
        ]
    );
    assert_eq!(steps[0].text, "FOR.CELL(cur,B1:B2) -> [Macro1!B1]");
}

#[test]
fn for_cell_over_an_empty_range_falls_through_past_next() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", "=FOR.CELL(cur,B1:XFD200000)")
            .formula("A2", r#"=FORMULA("body",A10)"#)
            .formula("A3", "=NEXT()")
            .formula("A4", r#"=FORMULA("after",A11)"#)
            .formula("A5", "=HALT()"),
    );
    let mut emulator = Emulator::new(&fixture);
    let started = Instant::now();
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());
    assert_eq!(addresses(&steps), vec!["A1", "A2", "A3", "A4", "A5"]);
    assert_eq!(statuses_at(&steps, "A2"), vec![EvalStatus::Ignored]);
    assert_eq!(cell_value(&emulator, "A10"), None);
    assert_eq!(cell_value(&emulator, "A11").as_deref(), Some("after"));
}

#[test]
fn goto_cycles_are_cut_off() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", "=GOTO(A2)")
            .formula("A2", "=GOTO(A1)"),
    );
    let steps: Vec<_> = Emulator::new(&fixture).deobfuscate().collect();

    assert_eq!(steps.len(), 22);
    let last = steps.last().expect("trace is not empty");
    assert_eq!(last.status, EvalStatus::End);
    assert_eq!(last.text, "[[LOOP]]: GOTO(Macro1!A1)");
}

#[test]
fn straight_line_code_is_not_a_cycle() {
    let sheet = (1..=22).fold(FixtureSheet::macrosheet("Macro1"), |sheet, row| {
        sheet.formula(&format!("A{row}"), "=1+1")
    });
    let steps: Vec<_> = Emulator::new(&macro_workbook(sheet)).deobfuscate().collect();

    assert_eq!(steps.len(), 22);
    assert!(steps.iter().all(|s| s.status == EvalStatus::FullEvaluation));
}

#[test]
fn repeated_iserror_answers_eventually_flip() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", "=WHILE(ISERROR(#N/A))")
            .formula("A2", "=NEXT()")
            .formula("A3", "=HALT()"),
    );
    let steps: Vec<_> = Emulator::new(&fixture).deobfuscate().collect();

    assert_eq!(statuses_at(&steps, "A1").len(), 11);
    let last = steps.last().expect("trace is not empty");
    assert_eq!(last.address.to_a1(), "A3");
    assert_eq!(last.status, EvalStatus::End);
}

#[test]
fn block_if_indents_until_end_if() {
    let fixture = macro_workbook(
        FixtureSheet::macrosheet("Macro1")
            .formula("A1", "=IF(TRUE)")
            .formula("A2", r#"=FORMULA("in",B1)"#)
            .formula("A3", "=END.IF()")
            .formula("A4", "=HALT()"),
    );
    let steps: Vec<_> = Emulator::new(&fixture).deobfuscate().collect();

    assert_eq!(
        steps.iter().map(|s| s.indent).collect::<Vec<_>>(),
        vec![0, 1, 0, 0]
    );
}
