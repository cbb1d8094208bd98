use crate::reporter::ProblemPerPhase;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

pub type Result<T, E = ZincError> = std::result::Result<T, E>;

/// An `io::Error` together with the path that produced it.
#[derive(Debug, thiserror::Error)]
#[error("\"{}\": {source}", self.path.display())]
pub struct ZincIoError {
    #[source]
    source: io::Error,
    path: PathBuf,
}

impl ZincIoError {
    pub fn new(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { source, path: path.into() }
    }

    /// The path that failed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_inner(self) -> io::Error {
        self.source
    }
}

/// Various errors surfaced while driving the incremental engine and
/// publishing its outputs.
#[derive(Debug, thiserror::Error)]
pub enum ZincError {
    /// The engine observed the cancellation flag and aborted, or reported
    /// cancellation on its own.
    #[error("compilation was cancelled")]
    CompileCancelled,
    /// The engine finished with compiler diagnostics and no usable analysis.
    #[error("compilation failed with {} problem(s)", problems.len())]
    CompileFailed { problems: Vec<ProblemPerPhase> },
    #[error(transparent)]
    Io(#[from] ZincIoError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Outcome of a memoized background task observed by a later caller.
    #[error("{0}")]
    Shared(Arc<ZincError>),
    #[error("{0}")]
    Message(String),
}

impl ZincError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        ZincIoError::new(err, path).into()
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Self::Message(msg.to_string())
    }

    /// Whether this error is the engine's cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CompileCancelled)
    }
}

impl From<Arc<ZincError>> for ZincError {
    fn from(err: Arc<ZincError>) -> Self {
        Self::Shared(err)
    }
}
