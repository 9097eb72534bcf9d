use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime policy for one emulator.
///
/// Every knob has a default, so `EmulatorConfig::default()` is a usable non-interactive setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmulatorConfig {
    /// Wall-clock budget for a whole run. `None` never times out.
    pub timeout: Option<Duration>,
    /// Fixed answer for `DAY(...)`. `None` lets the engine guess it.
    pub day_of_month: Option<u32>,
    /// Minimum output level a step needs to be reported. Levels at or above 3 only report
    /// string literals extracted from level-2 results.
    pub output_level: u8,
    /// Entry cell used when the workbook defines no `auto_open`/`auto_close` names.
    pub start_point: Option<String>,
    /// Ask the interactive shell for cells whose writes could not be resolved.
    pub interactive: bool,
    /// Tail length compared by the cycle detector.
    pub loop_window: usize,
    /// Visited cells kept for the cycle detector. Cycles longer than this go unflagged.
    pub loop_history: usize,
    /// How far below a jump target to look for a formula cell.
    pub formula_scan_limit: u32,
    /// Largest destination range, in cells, that `FORMULA`/`SET.VALUE` will write to.
    pub max_range_cells: u64,
    /// Consecutive identical `ISERROR` answers before the answer is flipped.
    pub max_iserror_loops: u32,
    /// Recursion limit for cell and defined-name evaluation.
    pub max_eval_depth: usize,
    /// Seconds `NOW()` advances on each call.
    pub now_step_seconds: i64,
    /// Answers for `GET.WORKSPACE(n)`.
    pub workspace: BTreeMap<u32, String>,
    /// Answers for `GET.WINDOW(n)`; types 1 and 30 are always derived from the workbook.
    pub window: BTreeMap<u32, String>,
    /// Answer for `DIRECTORY()`.
    pub directory: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            day_of_month: None,
            output_level: 0,
            start_point: None,
            interactive: false,
            loop_window: 10,
            loop_history: 1_000,
            formula_scan_limit: 10_000,
            max_range_cells: 65_536,
            max_iserror_loops: 10,
            max_eval_depth: 64,
            now_step_seconds: 2,
            workspace: default_workspace(),
            window: default_window(),
            directory: r"C:\Users\user\Documents".to_string(),
        }
    }
}

impl EmulatorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_day_of_month(mut self, day: u32) -> Self {
        self.day_of_month = Some(day);
        self
    }

    pub fn with_output_level(mut self, level: u8) -> Self {
        self.output_level = level;
        self
    }

    pub fn with_start_point(mut self, start: impl Into<String>) -> Self {
        self.start_point = Some(start.into());
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_loop_window(mut self, window: usize) -> Self {
        self.loop_window = window;
        self
    }

    pub fn with_loop_history(mut self, cells: usize) -> Self {
        self.loop_history = cells;
        self
    }

    pub fn with_max_range_cells(mut self, cells: u64) -> Self {
        self.max_range_cells = cells;
        self
    }

    pub fn with_workspace_value(mut self, id: u32, value: impl Into<String>) -> Self {
        self.workspace.insert(id, value.into());
        self
    }
}

fn default_workspace() -> BTreeMap<u32, String> {
    [
        (1, "Windows (64-bit) NT 10.00"),
        (2, "16.0"),
        (3, "0"),
        (13, "1536"),
        (14, "864"),
        (17, "TRUE"),
        (19, "TRUE"),
        (31, "FALSE"),
        (42, "TRUE"),
        (72, "FALSE"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .collect()
}

fn default_window() -> BTreeMap<u32, String> {
    [(7, "FALSE"), (8, "TRUE"), (20, "TRUE"), (23, "3")]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
}
