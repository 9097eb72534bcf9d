use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use xlm_model::{
    CellLocation, CellMap, DefinedNames, LocalAddress, SheetId, Workbook, WorkbookSource,
};

use crate::config::EmulatorConfig;
use crate::driver::Deobfuscation;
use crate::oracle::{InteractiveShell, IsErrorBreaker};
use crate::parser::{parse_formula, Expr, ParseError, XlmSyntax};
use crate::side_channel::{FileTable, MemoryMap, MemoryRegion, VirtualFile};
use crate::value::unwrap_str_literal;

/// What a pending path will evaluate first.
#[derive(Debug, Clone)]
pub(crate) enum PendingFormula {
    /// Formula text read from a cell.
    Text(String),
    /// A branch sub-expression pushed by `IF`.
    Expr(Rc<Expr>),
}

/// Cell grid a branch frame resumes with.
#[derive(Debug, Clone)]
pub(crate) enum CellMapState {
    /// Continue with the live grid.
    Shared,
    /// Restore this copy of the origin sheet before resuming.
    Owned(CellMap),
}

#[derive(Debug, Clone)]
pub(crate) struct BranchFrame {
    pub origin: CellLocation,
    pub formula: PendingFormula,
    pub cells: CellMapState,
    pub indent: usize,
    pub tag: String,
}

/// Lazy row-major walk over the existing cells of a range.
#[derive(Debug, Clone)]
pub(crate) struct RangeCursor {
    sheet: SheetId,
    start: LocalAddress,
    end: LocalAddress,
    /// `(row, col)` of the last cell handed out.
    last: Option<(u32, u32)>,
}

impl RangeCursor {
    pub fn new(sheet: SheetId, start: LocalAddress, end: LocalAddress) -> Self {
        Self {
            sheet,
            start,
            end,
            last: None,
        }
    }

    pub fn advance(&mut self, workbook: &Workbook) -> Option<CellLocation> {
        let last = self.last;
        let next = workbook
            .sheet(self.sheet)
            .cells_in_range(self.start, self.end)
            .into_iter()
            .map(|cell| cell.address)
            .find(|a| !last.is_some_and(|seen| (a.row, a.col) <= seen))?;
        self.last = Some((next.row, next.col));
        Some(CellLocation::new(self.sheet, next))
    }
}

/// An open `WHILE` or `FOR.CELL` loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopRecord {
    pub start: CellLocation,
    pub condition: bool,
    pub cursor: Option<RangeCursor>,
    /// Indent level the loop statement was written at; its `NEXT` must come back to it.
    pub indent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SelectedRange {
    pub start: CellLocation,
    pub end: CellLocation,
    pub selected: Option<CellLocation>,
}

#[derive(Debug, Clone)]
pub(crate) struct RegisteredFunction {
    pub target: String,
}

/// Mutable interpreter state for one run.
#[derive(Debug)]
pub(crate) struct InterpreterState {
    pub formula_cache: HashMap<String, Rc<Expr>>,
    pub branch_stack: Vec<BranchFrame>,
    pub loop_stack: Vec<LoopRecord>,
    /// Loop-stack depth at which body suppression started.
    pub suppress_from: Option<usize>,
    pub call_stack: Vec<CellLocation>,
    pub indent_level: usize,
    pub indent_current_line: bool,
    pub registered: HashMap<String, RegisteredFunction>,
    pub failed_writes: HashSet<CellLocation>,
    pub selected_range: Option<SelectedRange>,
    pub active_cell: Option<CellLocation>,
    pub memory: MemoryMap,
    pub files: FileTable,
    pub iserror: IsErrorBreaker,
    pub day_of_month: Option<u32>,
    pub char_error_count: usize,
    pub unknown_cell: Option<CellLocation>,
    pub evict_current_formula: bool,
    pub now_count: i64,
    pub eval_depth: usize,
    pub started: Instant,
}

impl InterpreterState {
    pub fn new(config: &EmulatorConfig) -> Self {
        Self {
            formula_cache: HashMap::new(),
            branch_stack: Vec::new(),
            loop_stack: Vec::new(),
            suppress_from: None,
            call_stack: Vec::new(),
            indent_level: 0,
            indent_current_line: false,
            registered: HashMap::new(),
            failed_writes: HashSet::new(),
            selected_range: None,
            active_cell: None,
            memory: MemoryMap::default(),
            files: FileTable::default(),
            iserror: IsErrorBreaker::default(),
            day_of_month: config.day_of_month,
            char_error_count: 0,
            unknown_cell: None,
            evict_current_formula: false,
            now_count: 0,
            eval_depth: 0,
            started: Instant::now(),
        }
    }

    pub fn suppressing(&self) -> bool {
        self.suppress_from.is_some()
    }

    /// Start suppressing loop bodies at the current loop depth, unless already suppressing.
    pub fn begin_suppression(&mut self) {
        if self.suppress_from.is_none() {
            self.suppress_from = Some(self.loop_stack.len());
        }
    }
}

/// Symbolic XLM emulator over one workbook.
///
/// ```no_run
/// use xlm_engine::{Emulator, EmulatorConfig};
/// use xlm_model::FixtureWorkbook;
///
/// let fixture = FixtureWorkbook::from_json("{\"name\":\"a.xlsm\"}").unwrap();
/// let mut emulator = Emulator::new(&fixture).with_config(EmulatorConfig::default());
/// for step in emulator.deobfuscate() {
///     println!("{} {} {}", step.address, step.status, step.text);
/// }
/// ```
pub struct Emulator<'s> {
    pub(crate) source: &'s dyn WorkbookSource,
    pristine: Workbook,
    pub(crate) workbook: Workbook,
    pub(crate) config: EmulatorConfig,
    pub(crate) syntax: XlmSyntax,
    pub(crate) state: InterpreterState,
    pub(crate) shell: Option<Box<dyn InteractiveShell + 's>>,
    /// Start time of the run that forked this emulator; forks share its deadline.
    inherited_start: Option<Instant>,
}

impl<'s> Emulator<'s> {
    pub fn new(source: &'s dyn WorkbookSource) -> Self {
        let pristine = Workbook::load(source);
        let config = EmulatorConfig::default();
        Self {
            source,
            workbook: pristine.clone(),
            pristine,
            syntax: XlmSyntax::from_source(source),
            state: InterpreterState::new(&config),
            config,
            shell: None,
            inherited_start: None,
        }
    }

    pub fn with_config(mut self, config: EmulatorConfig) -> Self {
        self.state = InterpreterState::new(&config);
        self.config = config;
        self
    }

    pub fn with_shell(mut self, shell: Box<dyn InteractiveShell + 's>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Start a fresh run. The workbook is restored to its loaded state first, so each call
    /// produces an independent trace.
    pub fn deobfuscate(&mut self) -> Deobfuscation<'_, 's> {
        self.workbook = self.pristine.clone();
        self.state = InterpreterState::new(&self.config);
        if let Some(started) = self.inherited_start {
            self.state.started = started;
        }
        Deobfuscation::new(self)
    }

    /// The grid as the last run left it.
    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn memory(&self) -> &[MemoryRegion] {
        self.state.memory.regions()
    }

    pub fn files(&self) -> &[VirtualFile] {
        self.state.files.files()
    }

    /// The configured or guessed day of month, if `DAY` was ever needed.
    pub fn day_of_month(&self) -> Option<u32> {
        self.state.day_of_month
    }

    /// Defined names as the last run left them, including `SET.NAME` bindings.
    pub fn defined_names(&self) -> &DefinedNames {
        self.workbook.names()
    }

    /// Out-of-range `CHAR` calls seen in the last run.
    pub fn char_error_count(&self) -> usize {
        self.state.char_error_count
    }

    /// A non-interactive copy over the pristine workbook with a fixed day of month. The copy
    /// runs against this run's deadline.
    pub(crate) fn fork_with_day(&self, day: u32) -> Emulator<'s> {
        let mut config = self.config.clone();
        config.day_of_month = Some(day);
        config.interactive = false;
        Emulator {
            source: self.source,
            pristine: self.pristine.clone(),
            workbook: self.pristine.clone(),
            syntax: self.syntax,
            state: InterpreterState::new(&config),
            config,
            shell: None,
            inherited_start: Some(self.state.started),
        }
    }

    pub(crate) fn sheet_name(&self, id: SheetId) -> &str {
        &self.workbook.sheet(id).name
    }

    /// `Sheet!A1` text for a location.
    pub(crate) fn location_text(&self, loc: CellLocation) -> String {
        format!(
            "{}!{}",
            xlm_model::quote_sheet_name(self.sheet_name(loc.sheet)),
            loc.address
        )
    }

    /// Resolve an optional sheet name against a default sheet.
    pub(crate) fn locate(
        &self,
        sheet: Option<&str>,
        default: SheetId,
        address: LocalAddress,
    ) -> Option<CellLocation> {
        let sheet = match sheet {
            Some(name) => self.workbook.sheet_id(name)?,
            None => default,
        };
        Some(CellLocation::new(sheet, address))
    }

    /// First formula cell at or below `loc` on a macrosheet.
    pub(crate) fn formula_cell_at(&self, loc: CellLocation) -> Option<CellLocation> {
        let sheet = self.workbook.sheet(loc.sheet);
        if !sheet.is_macrosheet() {
            return None;
        }
        sheet
            .formula_cell_at_or_below(loc.address, self.config.formula_scan_limit)
            .map(|address| CellLocation::new(loc.sheet, address))
    }

    pub(crate) fn parse_cached(&mut self, formula: &str) -> Result<Rc<Expr>, ParseError> {
        if let Some(expr) = self.state.formula_cache.get(formula) {
            return Ok(Rc::clone(expr));
        }
        let expr = Rc::new(parse_formula(formula, self.syntax)?);
        self.state
            .formula_cache
            .insert(formula.to_string(), Rc::clone(&expr));
        Ok(expr)
    }

    /// Write text into a cell, creating it if needed.
    ///
    /// Text starting with `=` becomes the formula unless `value_only`; the value is always set.
    pub(crate) fn set_cell(&mut self, loc: CellLocation, text: &str, value_only: bool) {
        let text = unwrap_str_literal(text);
        let cell = self.workbook.cell_entry(loc);
        if !value_only {
            cell.formula = text.starts_with('=').then(|| text.clone());
        }
        cell.value = Some(text);
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.config
            .timeout
            .is_some_and(|limit| self.state.started.elapsed() >= limit)
    }

    /// Run `f` one level deeper, or return `None` once the recursion limit is reached.
    pub(crate) fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Option<T> {
        if self.state.eval_depth >= self.config.max_eval_depth {
            log::debug!("evaluation depth limit reached");
            return None;
        }
        self.state.eval_depth += 1;
        let out = f(self);
        self.state.eval_depth -= 1;
        Some(out)
    }
}
