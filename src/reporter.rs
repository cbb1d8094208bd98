//! The reporter seam between the orchestrator, the engine and the client.
//!
//! Rendering of diagnostics is owned by the outer build server; this module
//! only fixes the callback surface the orchestrator drives and the problem
//! model carried through results and the persisted analysis.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};

/// Severity of a single compiler diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
}

/// A single compiler diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    /// Source file the diagnostic points at, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Problem {
    pub fn error(message: impl Into<String>, source: Option<PathBuf>) -> Self {
        Self { severity: Severity::Error, message: message.into(), source, line: None }
    }

    pub fn warning(message: impl Into<String>, source: Option<PathBuf>) -> Self {
        Self { severity: Severity::Warning, message: message.into(), source, line: None }
    }
}

/// A diagnostic attributed to the compiler phase that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemPerPhase {
    pub problem: Problem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Build status surfaced to clients at the end of a compile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Error,
    Cancelled,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Callbacks the orchestrator and the engine drive during one compile.
///
/// Implementations must tolerate concurrent calls: the engine reports
/// problems and progress from its own executor while the orchestrator owns
/// the start/end lifecycle. All engine-side writes happen before the engine's
/// compile future resolves, so [`Reporter::all_problems_per_phase`] is
/// quiescent by the time the orchestrator classifies the outcome.
pub trait Reporter: fmt::Debug + Send + Sync {
    /// Signals the start of a compile, carrying the problems of the previous
    /// run so clients can replay still-relevant diagnostics.
    fn report_start_compilation(&self, previous_problems: &[Problem]);

    /// A diagnostic reported by the engine mid-compile.
    fn report(&self, problem: ProblemPerPhase);

    /// The engine entered `phase` for `source`.
    fn report_next_phase(&self, phase: &str, source: &Path);

    fn report_compilation_progress(&self, progress: u64, total: u64);

    fn report_cancelled_compilation(&self);

    /// End-of-compile bookkeeping with the final status. On successful runs
    /// this is called once per triggered client with that client's classes
    /// directory and the analysis location.
    fn process_end_compilation(
        &self,
        previous_problems: &[Problem],
        code: StatusCode,
        client_classes_dir: Option<&Path>,
        analysis_out: Option<&Path>,
    );

    /// Fired exactly once per triggered background-task handle, after all
    /// background work finished or failed.
    fn report_end_compilation(&self);

    /// Switches the reporter into fatal-warnings mode; warnings are tracked
    /// per source so the outcome can be demoted afterwards.
    fn enable_fatal_warnings(&self);

    /// Source files that produced a warning while fatal-warnings mode was on.
    fn sources_with_fatal_warnings(&self) -> BTreeSet<PathBuf>;

    fn all_problems_per_phase(&self) -> Vec<ProblemPerPhase>;
}
