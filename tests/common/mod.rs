//! Shared harness for the compile integration tests: a deterministic fake
//! engine and a recording reporter.

use bloop_compile::{
    error::{Result, ZincError},
    zinc::{
        Analysis, CompileSetup, EngineInputs, EngineOutput, FileHash, IncrementalEngine,
        SourceInfo, Stamp, UniqueCompileInputs,
    },
    BackgroundTaskContext, BackgroundTaskFactory, CancelToken, ClasspathOptions, CompileExecutors,
    CompileInputs, CompileOutPaths, CompileResult, PreviousResult, Problem, ProblemPerPhase,
    Reporter, ServerJdk, Severity, StatusCode,
};
use semver::Version;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A reporter that records every callback for later assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    state: Mutex<ReporterState>,
}

#[derive(Debug, Default)]
pub struct ReporterState {
    pub start_calls: Vec<Vec<Problem>>,
    pub problems: Vec<ProblemPerPhase>,
    pub fatal_warnings_enabled: bool,
    pub fatal_sources: BTreeSet<PathBuf>,
    pub phases: Vec<(String, PathBuf)>,
    pub progress_ticks: usize,
    pub cancelled_reports: usize,
    pub end_reports: usize,
    pub process_end_calls: Vec<(StatusCode, Option<PathBuf>, Option<PathBuf>)>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap()
    }

    pub fn end_reports(&self) -> usize {
        self.state().end_reports
    }
}

impl Reporter for RecordingReporter {
    fn report_start_compilation(&self, previous_problems: &[Problem]) {
        self.state().start_calls.push(previous_problems.to_vec());
    }

    fn report(&self, problem: ProblemPerPhase) {
        let mut state = self.state();
        if state.fatal_warnings_enabled && problem.problem.severity == Severity::Warning {
            if let Some(source) = &problem.problem.source {
                state.fatal_sources.insert(source.clone());
            }
        }
        state.problems.push(problem);
    }

    fn report_next_phase(&self, phase: &str, source: &Path) {
        self.state().phases.push((phase.to_string(), source.to_path_buf()));
    }

    fn report_compilation_progress(&self, _progress: u64, _total: u64) {
        self.state().progress_ticks += 1;
    }

    fn report_cancelled_compilation(&self) {
        self.state().cancelled_reports += 1;
    }

    fn process_end_compilation(
        &self,
        _previous_problems: &[Problem],
        code: StatusCode,
        client_classes_dir: Option<&Path>,
        analysis_out: Option<&Path>,
    ) {
        self.state().process_end_calls.push((
            code,
            client_classes_dir.map(Path::to_path_buf),
            analysis_out.map(Path::to_path_buf),
        ));
    }

    fn report_end_compilation(&self) {
        self.state().end_reports += 1;
    }

    fn enable_fatal_warnings(&self) {
        self.state().fatal_warnings_enabled = true;
    }

    fn sources_with_fatal_warnings(&self) -> BTreeSet<PathBuf> {
        self.state().fatal_sources.clone()
    }

    fn all_problems_per_phase(&self) -> Vec<ProblemPerPhase> {
        self.state().problems.clone()
    }
}

/// A Zinc lookalike that "compiles" a source into one class file whose
/// contents are derived from the source contents.
///
/// Change detection works exactly like the engine's: a source is dirty when
/// its content stamp differs from the previous analysis, and a run with no
/// dirty sources returns the previous analysis untouched.
#[derive(Clone, Debug, Default)]
pub struct FakeEngine {
    /// Sources that fail with a type error.
    pub fail_on: Option<PathBuf>,
    /// Sources that produce a warning.
    pub warn_on: Option<PathBuf>,
    /// Wait for cancellation instead of compiling.
    pub block_until_cancelled: bool,
    /// Problems the engine reports only through its failure value, not
    /// through the reporter.
    pub extra_failure_problems: Vec<ProblemPerPhase>,
    /// File written by the registered on-failure background task.
    pub failure_marker: Option<PathBuf>,
}

impl IncrementalEngine for FakeEngine {
    fn compile(
        &self,
        inputs: EngineInputs,
    ) -> futures::future::BoxFuture<'static, Result<EngineOutput>> {
        let engine = self.clone();
        Box::pin(async move { engine.run(inputs).await })
    }
}

impl FakeEngine {
    async fn run(self, inputs: EngineInputs) -> Result<EngineOutput> {
        if let Some(marker) = self.failure_marker.clone() {
            let factory: BackgroundTaskFactory = Arc::new(move |_ctx: &BackgroundTaskContext| {
                let marker = marker.clone();
                Box::pin(async move {
                    fs::write(&marker, b"cleaned up").map_err(|err| ZincError::io(err, &marker))
                })
            });
            inputs.file_manager.add_task_on_failure(factory);
        }

        if self.block_until_cancelled {
            inputs.cancel.cancelled().await;
            if !inputs.setup.progress.advance(0, 1, "parser", "typer") {
                inputs.file_manager.complete(false);
                return Err(ZincError::CompileCancelled);
            }
        }

        let previous = inputs.previous_result.analysis.clone();
        let mut analysis = previous.as_deref().cloned().unwrap_or_else(Analysis::empty);

        let mut dirty = Vec::new();
        for source in &inputs.options.sources {
            let contents = fs::read(source).map_err(|err| ZincError::io(err, source))?;
            let stamp = Stamp::hash_of(&contents);
            if analysis.stamps.sources.get(source) != Some(&stamp) {
                dirty.push((source.clone(), contents));
            }
        }

        if dirty.is_empty() {
            if let Some(previous) = previous {
                inputs.file_manager.complete(true);
                return Ok(EngineOutput {
                    analysis: (*previous).clone(),
                    setup: inputs
                        .previous_result
                        .setup
                        .clone()
                        .unwrap_or_else(|| self.setup(&inputs)),
                });
            }
        }

        let total = dirty.len() as u64;
        let mut failure_problems = Vec::new();
        for (index, (source, contents)) in dirty.into_iter().enumerate() {
            inputs.setup.progress.start_unit("typer", &source);
            if !inputs.setup.progress.advance(index as u64, total, "typer", "jvm") {
                inputs.file_manager.complete(false);
                return Err(ZincError::CompileCancelled);
            }

            let mut reported = Vec::new();
            if self.fail_on.as_deref() == Some(source.as_path()) {
                let problem = ProblemPerPhase {
                    problem: Problem::error("type mismatch", Some(source.clone())),
                    phase: Some("typer".to_string()),
                };
                inputs.reporter.report(problem.clone());
                failure_problems.push(problem);
                continue;
            }
            if self.warn_on.as_deref() == Some(source.as_path()) {
                let problem = ProblemPerPhase {
                    problem: Problem::warning("unused value", Some(source.clone())),
                    phase: Some("typer".to_string()),
                };
                inputs.reporter.report(problem.clone());
                reported.push(problem.problem);
            }

            // invalidate what this source produced last time
            if let Some(previous_products) = analysis.relations.products.get(&source) {
                let previous_products: Vec<PathBuf> =
                    previous_products.iter().cloned().collect();
                for product in &previous_products {
                    analysis.stamps.products.remove(product);
                }
                inputs.file_manager.delete(&previous_products);
            }

            let class_name = format!(
                "{}.class",
                source.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default()
            );
            let class_file = inputs.options.classes_dir.join(class_name);
            let class_contents = format!("compiled:{}", String::from_utf8_lossy(&contents));
            fs::write(&class_file, &class_contents)
                .map_err(|err| ZincError::io(err, &class_file))?;
            inputs.file_manager.generated(std::slice::from_ref(&class_file));

            analysis.stamps.sources.insert(source.clone(), Stamp::hash_of(&contents));
            analysis
                .stamps
                .products
                .insert(class_file.clone(), Stamp::hash_of(class_contents.as_bytes()));
            analysis
                .relations
                .products
                .insert(source.clone(), BTreeSet::from([class_file]));
            analysis.infos.insert(source, SourceInfo { reported_problems: reported });
        }

        if !failure_problems.is_empty() {
            failure_problems.extend(self.extra_failure_problems.clone());
            inputs.file_manager.complete(false);
            return Err(ZincError::CompileFailed { problems: failure_problems });
        }

        inputs.file_manager.complete(true);
        Ok(EngineOutput { analysis, setup: self.setup(&inputs) })
    }

    fn setup(&self, inputs: &EngineInputs) -> CompileSetup {
        CompileSetup {
            compiler_version: Version::new(2, 13, 12),
            order: inputs.options.order,
            classpath_hashes: inputs.unique_inputs.classpath_hashes.clone(),
        }
    }
}

/// One on-disk project the tests compile repeatedly.
pub struct TestProject {
    pub tmp: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        init_tracing();
        Self { tmp: tempfile::tempdir().unwrap() }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.tmp.path().join("project")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.base_dir().join("out")
    }

    pub fn external_classes_dir(&self, client: &str) -> PathBuf {
        self.out_dir().join("clients").join(client).join("classes")
    }

    pub fn analysis_out(&self) -> PathBuf {
        self.out_dir().join("state").join("analysis.json")
    }

    /// The read-only directory of a project that never compiled: the empty
    /// sentinel, which exists only as a path.
    pub fn empty_read_only_dir(&self) -> PathBuf {
        CompileOutPaths::derive_empty_classes_dir("project", &self.external_classes_dir("owner"))
    }

    pub fn write_source(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.base_dir().join("src").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn inputs(
        &self,
        engine: Arc<dyn IncrementalEngine>,
        reporter: Arc<RecordingReporter>,
        read_only_dir: PathBuf,
        previous_result: PreviousResult,
        sources: Vec<PathBuf>,
        scalac_options: Vec<String>,
    ) -> CompileInputs {
        let classpath = vec![self.tmp.path().join("deps").join("scala-library.jar")];
        let unique_inputs = UniqueCompileInputs {
            sources: sources.clone(),
            classpath_hashes: vec![FileHash::new(classpath[0].clone(), 0x5ca1a)],
            scalac_options: scalac_options.clone(),
            javac_options: Vec::new(),
        };
        CompileInputs {
            sources,
            classpath,
            scalac_options,
            javac_options: Vec::new(),
            javac_bin: None,
            compile_order: Default::default(),
            base_directory: self.base_dir(),
            out_paths: CompileOutPaths::new(
                self.out_dir(),
                self.external_classes_dir("owner"),
                read_only_dir,
            ),
            analysis_out: self.analysis_out(),
            previous_result,
            previous_compile_result: None,
            dependent_results: BTreeMap::new(),
            invalidated_by_dependents: HashSet::new(),
            generated_by_dependents: HashSet::new(),
            unique_inputs,
            reporter,
            engine,
            cancel: CancelToken::new(),
            executors: CompileExecutors::from_current(),
            classpath_options: ClasspathOptions::default(),
            server_jdk: ServerJdk { java_home: self.tmp.path().join("jdk"), major: 17 },
        }
    }
}

/// Triggers the result's background tasks for one client.
pub async fn trigger(
    result: &CompileResult,
    client_classes_dir: &Path,
    reporter: Arc<RecordingReporter>,
) -> Result<()> {
    fs::create_dir_all(client_classes_dir).unwrap();
    result
        .background_tasks()
        .expect("result carries background tasks")
        .trigger(client_classes_dir.to_path_buf(), reporter, tracing::Span::current())
        .await
}

/// Success accessors that panic loudly on the wrong variant.
pub fn expect_success(result: &CompileResult) -> (&bloop_compile::CompileProducts, bool, bool) {
    match result {
        CompileResult::Success { products, is_no_op, reported_fatal_warnings, .. } => {
            (products, *is_no_op, *reported_fatal_warnings)
        }
        other => panic!("expected success, got {other:?}"),
    }
}

/// Sorted relative listing of every file under `dir`, with contents.
pub fn dir_snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut snapshot = BTreeMap::new();
    if !dir.exists() {
        return snapshot;
    }
    for entry in walkdir(dir) {
        let contents = fs::read(&entry).unwrap();
        snapshot.insert(entry.strip_prefix(dir).unwrap().to_path_buf(), contents);
    }
    snapshot
}

fn walkdir(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(next) = stack.pop() {
        for entry in fs::read_dir(&next).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
