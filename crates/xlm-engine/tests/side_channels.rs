use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use xlm_engine::{Emulator, EmulatorConfig, EvalStatus};
use xlm_model::{FixtureSheet, FixtureWorkbook};

fn macro_workbook(cells: &[(&str, &str)]) -> FixtureWorkbook {
    let sheet = cells
        .iter()
        .fold(FixtureSheet::macrosheet("Macro1"), |sheet, (a1, formula)| {
            sheet.formula(a1, *formula)
        });
    FixtureWorkbook::new("dropper.xlsm")
        .sheet(sheet)
        .defined_name("auto_open", "Macro1!$A$1")
}

#[test]
fn writes_spanning_two_regions_are_rejected() {
    let fixture = macro_workbook(&[
        ("A1", "=Kernel32.VirtualAlloc(4096,16)"),
        ("A2", "=Kernel32.VirtualAlloc(8192,16)"),
        ("A3", r#"=Kernel32.WriteProcessMemory(-1,4100,"abcdefghijklmnopqrst",20,0)"#),
    ]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[2].status, EvalStatus::Error);
    let regions: Vec<_> = emulator
        .memory()
        .iter()
        .map(|r| (r.base, r.data.clone()))
        .collect();
    assert_eq!(regions, vec![(4096, vec![0; 16]), (8192, vec![0; 16])]);
}

#[test]
fn process_memory_writes_land_in_the_region() {
    let fixture = macro_workbook(&[
        ("A1", "=Kernel32.VirtualAlloc(4096,16)"),
        ("A2", r#"=Kernel32.WriteProcessMemory(-1,4096,"MZ",2,0)"#),
    ]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[1].status, EvalStatus::FullEvaluation);
    assert_eq!(steps[1].text, r#"Kernel32.WriteProcessMemory(-1,4096,"4d5a",2,0)"#);
    assert_eq!(&emulator.memory()[0].data[..3], b"MZ\0");
}

#[test]
fn overlapping_allocations_are_relocated() {
    let fixture = macro_workbook(&[
        ("A1", "=Kernel32.VirtualAlloc(4096,16)"),
        ("A2", "=Kernel32.VirtualAlloc(4100,16)"),
    ]);
    let mut emulator = Emulator::new(&fixture);
    let _ = emulator.deobfuscate().count();

    let bases: Vec<_> = emulator.memory().iter().map(|r| r.base).collect();
    assert_eq!(bases, vec![4096, 4112 + 4096]);
}

#[test]
fn registered_aliases_dispatch_to_native_procedures() {
    let fixture = macro_workbook(&[
        ("A1", r#"=REGISTER("Kernel32","VirtualAlloc","JJJJJ","Valloc",,1,9)"#),
        ("A2", "=Valloc(1000,64)"),
    ]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[0].text, "REGISTER(Kernel32,VirtualAlloc,JJJJJ,Valloc,,1,9)");
    assert_eq!(emulator.memory().len(), 1);
    assert_eq!(emulator.memory()[0].base, 1000);
    assert_eq!(emulator.memory()[0].size(), 64);
}

#[test]
fn file_writes_accumulate_in_the_virtual_file() {
    let fixture = macro_workbook(&[
        ("A1", r#"=FOPEN("c:\users\public\a.vbs",3)"#),
        ("A2", r#"=FWRITELN(A1,"hello")"#),
        ("A3", r#"=FWRITE(A1,"world")"#),
    ]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[1].text, r#"FWRITELN("c:\users\public\a.vbs","hello")"#);
    let files = emulator.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, r"c:\users\public\a.vbs");
    assert_eq!(files[0].access, "3");
    assert_eq!(files[0].content, "hello\r\nworld");
}

#[test]
fn configured_day_of_month_is_used_as_is() {
    let fixture = macro_workbook(&[("A1", "=FORMULA(DAY(NOW()),B1)")]);
    let config = EmulatorConfig::default().with_day_of_month(5);
    let mut emulator = Emulator::new(&fixture).with_config(config);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(steps[0].text, "FORMULA(5,B1)");
    assert_eq!(emulator.day_of_month(), Some(5));
}

#[test]
fn day_of_month_is_guessed_from_the_cleanest_trace() {
    // Only days 17..=28 decode to printable characters; the first of them wins.
    let fixture = macro_workbook(&[("A1", "=CHAR(DAY(NOW())*8-100)"), ("A2", "=HALT()")]);
    let mut emulator = Emulator::new(&fixture);
    let steps: Vec<_> = emulator.deobfuscate().collect();

    assert_eq!(emulator.day_of_month(), Some(17));
    assert_eq!(steps[0].text, "$");
}

#[test]
fn day_guessing_stays_within_the_run_timeout() {
    let fixture = macro_workbook(&[
        ("A1", "=FORMULA(DAY(NOW()),B1)"),
        ("A2", "=WHILE(TRUE)"),
        ("A3", "=1+1"),
        ("A4", "=NEXT()"),
    ]);
    let config = EmulatorConfig::default().with_timeout(Duration::from_millis(200));
    let mut emulator = Emulator::new(&fixture).with_config(config);
    let started = Instant::now();
    let first = emulator.deobfuscate().next();

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert_eq!(first.map(|step| step.address.to_a1()).as_deref(), Some("A1"));
    assert!(emulator.day_of_month().is_some());
}
