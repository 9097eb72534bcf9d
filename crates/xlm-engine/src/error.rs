use thiserror::Error;

use crate::parser::ParseError;

/// Failures that stop the emulator from starting or continuing a walk.
///
/// None of these abort a run: the driver logs them and moves on to the next path or entry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot parse formula in {cell}: {source}")]
    Parse {
        cell: String,
        #[source]
        source: ParseError,
    },
    #[error("unknown sheet `{0}`")]
    UnknownSheet(String),
    #[error("entry point `{label}` ({target}) does not resolve to a macrosheet formula")]
    EntryPoint { label: String, target: String },
}
