#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod cancel;
pub use cancel::CancelToken;

pub mod classfiles;
pub use classfiles::{BackgroundTaskContext, BackgroundTaskFactory, ClassFileManager};

mod compile;
pub use compile::{compile, CompileBackgroundTasks, CompileProducts, CompileResult};

pub mod config;
pub use config::CompileOutPaths;

pub mod copy;

pub mod error;
pub use error::{ZincError, ZincIoError};

pub mod jdk;
pub use jdk::ServerJdk;

pub mod progress;
pub use progress::CompileProgress;

pub mod reporter;
pub use reporter::{Problem, ProblemPerPhase, Reporter, Severity, StatusCode};

pub mod utils;

pub mod zinc;
pub use zinc::{
    Analysis, ClasspathOptions, CompileOrder, IncrementalEngine, PreviousResult,
    UniqueCompileInputs,
};

use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::Arc,
};

/// The two runtimes one compile schedules onto: the engine's CPU-bound work
/// and the post-compile I/O.
#[derive(Clone, Debug)]
pub struct CompileExecutors {
    pub compute: tokio::runtime::Handle,
    pub io: tokio::runtime::Handle,
}

impl CompileExecutors {
    /// Uses the ambient runtime for both sides. Servers that separate their
    /// pools construct the value directly.
    pub fn from_current() -> Self {
        let handle = tokio::runtime::Handle::current();
        Self { compute: handle.clone(), io: handle }
    }
}

/// Everything one compile of one project consumes.
///
/// Immutable for the duration of the compile; the only mutation happens in
/// run-scoped bookkeeping the request never sees.
#[derive(Debug)]
pub struct CompileInputs {
    pub sources: Vec<PathBuf>,
    pub classpath: Vec<PathBuf>,
    pub scalac_options: Vec<String>,
    pub javac_options: Vec<String>,
    /// The javac binary the project compiles with, when pinned to a JDK
    /// other than the server's.
    pub javac_bin: Option<PathBuf>,
    pub compile_order: CompileOrder,
    /// Project base directory; the engine's cache file lives under it.
    pub base_directory: PathBuf,
    pub out_paths: CompileOutPaths,
    /// Where the analysis of a successful run is persisted.
    pub analysis_out: PathBuf,
    pub previous_result: PreviousResult,
    /// The result of the previous compile of this project, used to replay
    /// still-relevant diagnostics at start.
    pub previous_compile_result: Option<CompileResult>,
    /// Previous results of dependent projects keyed by their classes
    /// directories.
    pub dependent_results: BTreeMap<PathBuf, PreviousResult>,
    pub invalidated_by_dependents: HashSet<PathBuf>,
    pub generated_by_dependents: HashSet<PathBuf>,
    pub unique_inputs: UniqueCompileInputs,
    pub reporter: Arc<dyn Reporter>,
    pub engine: Arc<dyn IncrementalEngine>,
    pub cancel: CancelToken,
    pub executors: CompileExecutors,
    pub classpath_options: ClasspathOptions,
    pub server_jdk: ServerJdk,
}
