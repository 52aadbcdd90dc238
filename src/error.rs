//! Error taxonomy for the wheel core
//!
//! Pure functions in [`crate::engine`] and [`crate::drill::metrics`] never
//! return `Result` - they cannot fail by construction. Everything else
//! distinguishes fatal configuration problems (which the caller must exit
//! on) from transient failures (which are logged and folded into
//! `SessionState` instead of propagated).

use thiserror::Error;

/// Errors the Wheel Loop itself can surface.
///
/// Most failure modes described in the core's error taxonomy are recovered
/// locally (turned into a shutdown request, a retry, a learning entry) and
/// never reach a `WheelError`. Only fatal configuration and strict-policy
/// branch divergence propagate this far.
#[derive(Debug, Error)]
pub enum WheelError {
    #[error("not a git repository: {0}")]
    NotARepo(String),

    #[error("session not initialized: {0}")]
    NotInitialized(String),

    #[error("base branch diverged from upstream under strict pull policy")]
    BranchDiverged,

    #[error(transparent)]
    Other(#[from] eyre::Error),
}

impl WheelError {
    /// Exit code a CLI entry point should use for this error, per the
    /// core's documented exit-code contract (0 success, 1 failure, 2 init).
    pub fn exit_code(&self) -> i32 {
        match self {
            WheelError::NotARepo(_) | WheelError::NotInitialized(_) => 2,
            _ => 1,
        }
    }

    /// Whether this error should halt the loop immediately rather than be
    /// folded into a graceful shutdown request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WheelError::NotARepo(_) | WheelError::NotInitialized(_))
    }
}

/// Errors from the Drill History Store's crash-safe persistence layer.
#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed history file at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Errors from the hand-rolled trajectory YAML dialect.
///
/// Per the engine's documented failure semantics, a malformed document does
/// not produce this error during a normal `parse` call (malformed steps are
/// dropped with a warning instead); `YamlError` exists for the narrower set
/// of structural failures a caller must react to (unreadable file, not a
/// mapping at the top level).
#[derive(Debug, Error)]
pub enum YamlError {
    #[error("expected a YAML mapping at the document root")]
    NotAMapping,

    #[error("unterminated quoted string on line {0}")]
    UnterminatedQuote(usize),
}
