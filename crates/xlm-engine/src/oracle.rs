//! Heuristics that stand in for facts the emulator cannot know: cycle detection, the
//! `ISERROR` flip, day-of-month scoring, and the interactive value prompt.

use xlm_model::CellLocation;

/// True when the last `window` entries of `path` already occurred earlier in the path.
///
/// Paths shorter than twice the window are never flagged.
pub fn has_loop<T: PartialEq>(path: &[T], window: usize) -> bool {
    if window == 0 || path.len() < 2 * window {
        return false;
    }
    let start = path.len() - window;
    let tail = &path[start..];
    (0..start - window).any(|j| path[j..j + window] == *tail)
}

/// Flips a repeated `ISERROR` answer so sandbox-detection loops eventually exit.
#[derive(Debug, Clone, Default)]
pub struct IsErrorBreaker {
    location: Option<CellLocation>,
    last: bool,
    count: u32,
}

impl IsErrorBreaker {
    /// Record an answer for `cell` and return the answer to report.
    ///
    /// Only one call site is tracked at a time. After `max` identical answers in a row the
    /// next one is inverted and tracking resets.
    pub fn observe(&mut self, cell: CellLocation, answer: bool, max: u32) -> bool {
        match self.location {
            None => {
                self.location = Some(cell);
                self.last = answer;
                self.count = 1;
                answer
            }
            Some(tracked) if tracked == cell => {
                if self.last != answer {
                    self.last = answer;
                    self.count = 1;
                    answer
                } else if self.count < max {
                    self.count += 1;
                    answer
                } else {
                    log::info!("flipping ISERROR at {} after {max} repeats", cell.address);
                    self.location = None;
                    !answer
                }
            }
            Some(_) => answer,
        }
    }
}

/// Characters outside the printable range `32..=128` in a piece of trace text.
pub fn non_printable_count(text: &str) -> usize {
    text.chars()
        .filter(|c| !(32..=128).contains(&u32::from(*c)))
        .count()
}

/// What the driver knows when it asks for a value it could not compute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValueRequest {
    /// Cell whose formula is being evaluated.
    pub current_cell: String,
    pub formula: Option<String>,
    /// Cell that was written with an unresolved value and is now being read.
    pub unknown_cell: String,
    /// Partial rendering of the formula so far.
    pub partial_text: String,
}

/// Operator-facing prompt used in interactive runs.
pub trait InteractiveShell {
    /// Value to store in the unknown cell before re-evaluating, or `None` to continue
    /// with the partial result.
    fn provide_value(&mut self, request: &UnknownValueRequest) -> Option<String>;

    /// Entry cell to start from when the workbook names none.
    fn entry_point(&mut self) -> Option<String> {
        None
    }
}

impl<F> InteractiveShell for F
where
    F: FnMut(&UnknownValueRequest) -> Option<String>,
{
    fn provide_value(&mut self, request: &UnknownValueRequest) -> Option<String> {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use xlm_model::{LocalAddress, SheetId};

    fn loc(row: u32) -> CellLocation {
        CellLocation::new(SheetId(0), LocalAddress::new(1, row))
    }

    #[test]
    fn flags_two_cell_cycle() {
        let path: Vec<u32> = (0..22).map(|i| i % 2).collect();
        assert!(has_loop(&path, 10));
        assert!(!has_loop(&path[..21], 10));
    }

    #[test]
    fn straight_line_is_not_a_loop() {
        let path: Vec<u32> = (0..200).collect();
        assert!(!has_loop(&path, 10));
    }

    #[test]
    fn iserror_flips_after_max_repeats() {
        let mut breaker = IsErrorBreaker::default();
        let cell = loc(1);
        let answers: Vec<bool> = (0..11).map(|_| breaker.observe(cell, true, 10)).collect();
        assert!(answers[..10].iter().all(|a| *a));
        assert!(!answers[10]);
        assert!(breaker.observe(cell, true, 10), "tracking restarts after a flip");
        assert!(!breaker.observe(loc(2), false, 10));
    }

    #[test]
    fn counts_non_printable_chars() {
        assert_eq!(non_printable_count("abc"), 0);
        assert_eq!(non_printable_count("a\u{1}\u{ff}"), 2);
    }

    proptest! {
        #[test]
        fn prop_distinct_paths_never_loop(len in 0usize..300) {
            let path: Vec<usize> = (0..len).collect();
            prop_assert!(!has_loop(&path, 10));
        }

        #[test]
        fn prop_periodic_paths_loop(period in 1usize..=10, extra in 0usize..40) {
            let len = 20 + period + extra;
            let path: Vec<usize> = (0..len).map(|i| i % period).collect();
            prop_assert!(has_loop(&path, 10));
        }
    }
}
