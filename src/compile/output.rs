//! Result values returned by [`crate::compile()`].

use crate::{
    compile::background::CompileBackgroundTasks,
    error::ZincError,
    reporter::{Problem, ProblemPerPhase, Reporter},
    zinc::{PreviousResult, UniqueCompileInputs},
};
use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

/// What one compile produced, from the perspective of downstream consumers.
#[derive(Clone, Debug)]
pub struct CompileProducts {
    /// Source of truth for outputs unchanged by this run.
    pub read_only_classes_dir: PathBuf,
    /// Source of truth for outputs changed by this run. Equal to the
    /// read-only directory on the no-op path.
    pub new_classes_dir: PathBuf,
    /// Previous result handed to dependent projects compiling against this
    /// run; carries the raw (unrebased) analysis.
    pub result_for_dependent_compilations: PreviousResult,
    /// Previous result replayed into the next run of this project; carries
    /// the rebased analysis.
    pub result_for_future_compilations: PreviousResult,
    /// Class files and extra products invalidated by this run.
    pub invalidated_compile_products: HashSet<PathBuf>,
    /// Generated class files keyed by path relative to the new directory.
    pub generated_relative_class_file_paths: BTreeMap<String, PathBuf>,
}

/// The outcome of a compile request.
///
/// `Empty`, `Blocked` and `GlobalError` are constructed upstream of the
/// orchestrator and only flow through here for uniformity.
#[derive(Clone, Debug)]
pub enum CompileResult {
    Empty,
    Blocked {
        /// Names of the projects this request is waiting on.
        on: Vec<String>,
    },
    GlobalError {
        problem: String,
        cause: Option<Arc<ZincError>>,
    },
    Success {
        inputs: UniqueCompileInputs,
        reporter: Arc<dyn Reporter>,
        products: CompileProducts,
        elapsed: Duration,
        background_tasks: CompileBackgroundTasks,
        is_no_op: bool,
        reported_fatal_warnings: bool,
    },
    Failed {
        problems: Vec<ProblemPerPhase>,
        cause: Option<Arc<ZincError>>,
        elapsed: Duration,
        background_tasks: CompileBackgroundTasks,
    },
    Cancelled {
        problems: Vec<ProblemPerPhase>,
        elapsed: Duration,
        background_tasks: CompileBackgroundTasks,
    },
}

impl CompileResult {
    /// Success-shaped results, including the empty one.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Empty)
    }

    pub fn is_not_ok(&self) -> bool {
        !self.is_ok()
    }

    /// The problems a new compile of the same project should replay at
    /// start, given this result was its predecessor.
    pub fn problems_for_replay(&self, previous_analysis_problems: &[Problem]) -> Vec<Problem> {
        match self {
            Self::Failed { problems, .. } | Self::Cancelled { problems, .. } => {
                problems.iter().map(|p| p.problem.clone()).collect()
            }
            Self::Success { .. } => previous_analysis_problems.to_vec(),
            _ => Vec::new(),
        }
    }

    /// The deferred background tasks of this result, if any.
    pub fn background_tasks(&self) -> Option<&CompileBackgroundTasks> {
        match self {
            Self::Success { background_tasks, .. }
            | Self::Failed { background_tasks, .. }
            | Self::Cancelled { background_tasks, .. } => Some(background_tasks),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizers() {
        assert!(CompileResult::Empty.is_ok());
        assert!(CompileResult::Blocked { on: vec!["core".into()] }.is_not_ok());
        assert!(CompileResult::GlobalError { problem: "boom".into(), cause: None }.is_not_ok());
    }
}
