//! `xlmdeobf`: emulate the Excel 4.0 macros of a workbook fixture and print what they do.

#![forbid(unsafe_code)]

mod report;

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use xlm_engine::{
    Emulator, EmulatorConfig, EvalStatus, InteractiveShell, TraceStep, UnknownValueRequest,
};
use xlm_model::FixtureWorkbook;

use crate::report::{
    extracted_cells, format_cell, format_step, Report, DEFAULT_EXTRACT_FORMAT,
    DEFAULT_OUTPUT_FORMAT,
};

#[derive(Debug, Parser)]
#[command(name = "xlmdeobf")]
#[command(about = "Emulate Excel 4.0 (XLM) macros in a workbook fixture and print the deobfuscated trace.")]
struct Cli {
    /// Workbook fixture (JSON).
    file: PathBuf,

    /// Emulator settings as JSON. Command-line flags override it.
    #[arg(short = 'c', long = "config-file")]
    config_file: Option<PathBuf>,

    /// Start from this cell (e.g. `Macro1!A1`) when the workbook has no `auto_open` name.
    #[arg(long)]
    start_point: Option<String>,

    /// Stop emulation after N seconds.
    #[arg(long, value_name = "N")]
    timeout: Option<u64>,

    /// Answer for `DAY(...)`. Without it the day is guessed when a macro asks.
    #[arg(short = 'd', long)]
    day: Option<u32>,

    /// 0: all commands, 1: no jumps, 2: important commands, 3: strings in important commands.
    #[arg(short = 'o', long)]
    output_level: Option<u8>,

    /// Never prompt for values the emulator cannot compute.
    #[arg(short = 'n', long)]
    noninteractive: bool,

    /// Write a JSON report to this path instead of printing the trace.
    #[arg(long, value_name = "FILE_PATH")]
    export_json: Option<PathBuf>,

    /// Do not indent formulas inside loops and blocks.
    #[arg(long)]
    no_indent: bool,

    /// Template for trace lines (`[[CELL-ADDR]]`, `[[STATUS]]`, `[[INT-FORMULA]]`).
    #[arg(long, default_value = DEFAULT_OUTPUT_FORMAT)]
    output_formula_format: String,

    /// Only list macrosheet cells; no emulation.
    #[arg(short = 'x', long)]
    extract_only: bool,

    /// Template for extracted cells (`[[CELL-ADDR]]`, `[[CELL-FORMULA]]`, `[[CELL-VALUE]]`).
    #[arg(long, default_value = DEFAULT_EXTRACT_FORMAT)]
    extract_formula_format: String,

    /// Order extracted cells column by column (requires `--extract-only`).
    #[arg(long, requires = "extract_only")]
    sort_formulas: bool,

    /// Print the workbook's defined names.
    #[arg(long)]
    defined_names: bool,
}

/// Prompts on stderr and reads answers from stdin. End of input or an empty line means
/// "no value".
struct StdinShell;

impl StdinShell {
    fn read_answer() -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let answer = line.trim_end_matches(['\r', '\n']);
                (!answer.is_empty()).then(|| answer.to_string())
            }
        }
    }
}

impl InteractiveShell for StdinShell {
    fn provide_value(&mut self, request: &UnknownValueRequest) -> Option<String> {
        eprintln!("Current cell:\t{}", request.current_cell);
        if let Some(formula) = &request.formula {
            eprintln!("Current formula:\t{formula}");
        }
        eprintln!("Partial evaluation:\t{}", request.partial_text);
        eprint!("Value of {} (empty to skip): ", request.unknown_cell);
        Self::read_answer()
    }

    fn entry_point(&mut self) -> Option<String> {
        eprintln!("There is no entry point, please specify a cell address to start");
        eprint!("Example: Sheet1!A1: ");
        Self::read_answer()
    }
}

fn load_config(cli: &Cli) -> Result<EmulatorConfig> {
    let mut config: EmulatorConfig = match &cli.config_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read config file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse config file {}", path.display()))?
        }
        None => EmulatorConfig::default(),
    };
    if let Some(start) = &cli.start_point {
        config = config.with_start_point(start.clone());
    }
    if let Some(seconds) = cli.timeout.filter(|s| *s > 0) {
        config = config.with_timeout(Duration::from_secs(seconds));
    }
    if let Some(day) = cli.day.filter(|d| *d > 0) {
        config = config.with_day_of_month(day);
    }
    if let Some(level) = cli.output_level {
        config = config.with_output_level(level);
    }
    if cli.noninteractive {
        config = config.with_interactive(false);
    } else if cli.config_file.is_none() {
        config = config.with_interactive(true);
    }
    Ok(config)
}

fn write_json(path: &Path, report: &Report) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serialize report")?;
    fs::write(path, json).with_context(|| format!("write report to {}", path.display()))?;
    log::info!("report written to {}", path.display());
    Ok(())
}

fn run(cli: &Cli, out: &mut impl Write) -> Result<()> {
    let content =
        fs::read(&cli.file).with_context(|| format!("read {}", cli.file.display()))?;
    let text = String::from_utf8_lossy(&content);
    let fixture = FixtureWorkbook::from_json(&text)
        .with_context(|| format!("load workbook fixture {}", cli.file.display()))?;
    let config = load_config(cli)?;
    let file_path = cli.file.display().to_string();

    let mut emulator = Emulator::new(&fixture).with_config(config.clone());
    if config.interactive {
        emulator = emulator.with_shell(Box::new(StdinShell));
    }

    if cli.defined_names {
        writeln!(out, "[Defined Names]")?;
        for (name, value) in emulator.defined_names().iter() {
            writeln!(out, "{name} --> {value}")?;
        }
    }

    if cli.extract_only {
        let sheets = extracted_cells(emulator.workbook(), cli.sort_formulas);
        if let Some(path) = &cli.export_json {
            let report =
                Report::new(&file_path, &content, emulator.defined_names()).with_cells(&sheets);
            return write_json(path, &report);
        }
        for (sheet, cells) in &sheets {
            writeln!(out, "SHEET: {sheet}, Macrosheet")?;
            for cell in cells {
                writeln!(out, "{}", format_cell(cell, &cli.extract_formula_format))?;
            }
        }
        return Ok(());
    }

    let with_indent = !cli.no_indent;
    let mut steps: Vec<TraceStep> = Vec::new();
    if cli.export_json.is_none() {
        writeln!(out, "[Starting Deobfuscation]")?;
    }
    for step in emulator.deobfuscate() {
        if step.status == EvalStatus::Ignored {
            continue;
        }
        if cli.export_json.is_some() {
            steps.push(step);
        } else {
            writeln!(out, "{}", format_step(&step, &cli.output_formula_format, with_indent))?;
        }
    }

    if let Some(path) = &cli.export_json {
        let report = Report::new(&file_path, &content, emulator.defined_names())
            .with_steps(&steps)
            .with_side_effects(emulator.memory(), emulator.files())
            .with_day_of_month(emulator.day_of_month());
        return write_json(path, &report);
    }

    if let Some(day) = emulator.day_of_month() {
        writeln!(out, "[Day of Month] {day}")?;
    }
    for region in emulator.memory() {
        writeln!(
            out,
            "Memory: base {}, size {}\n{}\n",
            region.base,
            region.size(),
            hex::encode(&region.data)
        )?;
    }
    for file in emulator.files().iter().filter(|f| !f.content.is_empty()) {
        writeln!(
            out,
            "Files: path {}, access {}\n{}\n",
            file.name, file.access, file.content
        )?;
    }
    writeln!(out, "[END of Deobfuscation]")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run(&cli, &mut out) {
        Err(err)
            if err
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe) =>
        {
            Ok(())
        }
        other => other,
    }
}
