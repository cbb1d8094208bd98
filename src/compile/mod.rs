//! Driving one incremental compile: stage directories, invoke the engine,
//! classify the outcome and defer publication.
//!
//! The compile is a small state machine. Setup computes the directory
//! layout and the engine inputs; the engine call is the only long step;
//! classification turns the engine's verdict into a [`CompileResult`] whose
//! embedded background tasks publish state to clients when triggered.

use crate::{
    cancel::CancelToken,
    classfiles::ClassFileManager,
    error::ZincError,
    jdk,
    progress::CompileProgress,
    reporter::{Problem, Reporter, StatusCode},
    zinc::{
        Analysis, CompileOptions, EngineInputs, EngineSetup, IncrementalOptions, PreviousResult,
    },
    CompileInputs,
};
use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

pub mod background;
pub mod output;

pub use background::CompileBackgroundTasks;
pub use output::{CompileProducts, CompileResult};

/// Stripped from the options passed to the engine; its presence switches the
/// reporter into fatal-warnings mode instead.
const FATAL_WARNINGS_FLAG: &str = "-Xfatal-warnings";

/// Compiles one project with the engine and classifies the outcome.
///
/// The returned result never leaks the per-run bookkeeping; everything a
/// client needs flows through [`CompileProducts`] and the background tasks.
/// Dropping the returned future mid-engine-call cancels the compile: the
/// shared flag is completed and the reporter told about the cancellation.
#[instrument(skip_all, name = "compile", fields(project = %inputs.out_paths.external_name()))]
pub async fn compile(inputs: CompileInputs) -> CompileResult {
    let start = Instant::now();

    // 1. setup: directory layout, bookkeeping, engine inputs
    let read_only_classes_dir = inputs.out_paths.internal_read_only_classes_dir.clone();
    let new_classes_dir = match inputs.out_paths.internal_new_classes_dir() {
        Ok(dir) => dir.to_path_buf(),
        Err(err) => {
            return global_error("failed to create the fresh classes directory", err);
        }
    };

    let denied_by_dependents: HashSet<PathBuf> = inputs
        .generated_by_dependents
        .iter()
        .filter(|path| path.starts_with(&read_only_classes_dir))
        .cloned()
        .collect();
    let file_manager = match ClassFileManager::new(
        new_classes_dir.clone(),
        read_only_classes_dir.clone(),
        inputs.invalidated_by_dependents.clone(),
        denied_by_dependents,
    ) {
        Ok(manager) => Arc::new(manager),
        Err(err) => return global_error("failed to allocate the class file manager", err),
    };

    let scalac_options = jdk::adjust_scalac_options_for_release(
        inputs.scalac_options.clone(),
        inputs.javac_bin.as_deref(),
        &inputs.server_jdk,
    );
    let (scalac_options, fatal_warnings_enabled) = split_fatal_warnings(scalac_options);
    if fatal_warnings_enabled {
        inputs.reporter.enable_fatal_warnings();
    }

    let options = CompileOptions {
        classes_dir: new_classes_dir.clone(),
        sources: inputs.sources.clone(),
        classpath: inputs.classpath.clone(),
        scalac_options,
        javac_options: inputs.javac_options.clone(),
        order: inputs.compile_order,
    };

    // The engine resolves both of this project's directories to the previous
    // result; dependent projects resolve to theirs.
    let mut lookup = inputs.dependent_results.clone();
    lookup.insert(read_only_classes_dir.clone(), inputs.previous_result.clone());
    lookup.insert(new_classes_dir.clone(), inputs.previous_result.clone());

    let setup = EngineSetup {
        lookup,
        cache_file: inputs.base_directory.join("cache"),
        incremental: IncrementalOptions::create(),
        progress: Arc::new(CompileProgress::new(
            inputs.reporter.clone(),
            inputs.cancel.clone(),
        )),
    };

    let previous_successful_problems: Vec<Problem> = inputs
        .previous_result
        .analysis
        .as_deref()
        .map(Analysis::all_problems)
        .unwrap_or_default();
    let previous_problems = match &inputs.previous_compile_result {
        Some(result) => result.problems_for_replay(&previous_successful_problems),
        None => Vec::new(),
    };

    // 2. start
    inputs.reporter.report_start_compilation(&previous_problems);

    // 3. drive the engine
    let engine_inputs = EngineInputs {
        options,
        setup,
        previous_result: inputs.previous_result.clone(),
        unique_inputs: inputs.unique_inputs.clone(),
        reporter: inputs.reporter.clone(),
        file_manager: file_manager.clone(),
        cancel: inputs.cancel.clone(),
        classpath_options: inputs.classpath_options,
        compute: inputs.executors.compute.clone(),
    };

    let guard = CancelOnDrop::arm(inputs.cancel.clone(), inputs.reporter.clone());
    let engine_result = inputs.engine.compile(engine_inputs).await;
    guard.disarm();

    let elapsed = start.elapsed();

    // 4. classify
    match engine_result {
        // the engine can still win a race against cancellation; the flag is
        // authoritative
        Ok(_) if inputs.cancel.is_cancelled() => {
            cancelled_result(&inputs, &previous_successful_problems, elapsed, &file_manager)
        }
        Ok(engine_output) => {
            let fatal_sources = inputs.reporter.sources_with_fatal_warnings();
            let reported_fatal_warnings = fatal_warnings_enabled && !fatal_sources.is_empty();
            let status = if reported_fatal_warnings { StatusCode::Error } else { StatusCode::Ok };
            let is_no_op =
                inputs.previous_result.analysis.as_deref() == Some(&engine_output.analysis);
            let bookkeeping = file_manager.drain();

            if is_no_op {
                trace!("no-op compile, reusing {}", read_only_classes_dir.display());
                let refreshed =
                    inputs.previous_result.with_fresh_classpath_hashes(&inputs.unique_inputs);
                let products = CompileProducts {
                    read_only_classes_dir: read_only_classes_dir.clone(),
                    new_classes_dir: read_only_classes_dir.clone(),
                    result_for_dependent_compilations: refreshed.clone(),
                    result_for_future_compilations: refreshed,
                    invalidated_compile_products: HashSet::new(),
                    generated_relative_class_file_paths: BTreeMap::new(),
                };
                let background_tasks = CompileBackgroundTasks::for_no_op(
                    new_classes_dir,
                    read_only_classes_dir,
                    inputs.analysis_out.clone(),
                    inputs.previous_result.clone(),
                    previous_successful_problems,
                    status,
                    inputs.executors.io.clone(),
                    copy_parallelism(),
                );
                CompileResult::Success {
                    inputs: inputs.unique_inputs,
                    reporter: inputs.reporter,
                    products,
                    elapsed,
                    background_tasks,
                    is_no_op: true,
                    reported_fatal_warnings,
                }
            } else {
                let rebased_analysis = Arc::new(engine_output.analysis.rebased_products(
                    &read_only_classes_dir,
                    &new_classes_dir,
                    &fatal_sources,
                ));
                let raw_analysis = Arc::new(engine_output.analysis);
                let result_for_dependent_compilations = PreviousResult {
                    analysis: Some(raw_analysis),
                    setup: Some(engine_output.setup.clone()),
                };
                let result_for_future_compilations = PreviousResult {
                    analysis: Some(rebased_analysis.clone()),
                    setup: Some(engine_output.setup.clone()),
                };

                let mut invalidated = bookkeeping.invalidated_class_files;
                invalidated.extend(bookkeeping.invalidated_extra_products);
                let mut copy_denylist = bookkeeping.readonly_copy_denylist;
                copy_denylist.extend(invalidated.iter().cloned());

                // invalidated read-only files whose relative path was not
                // regenerated this run; their client counterparts are stale
                let stale_in_client: HashSet<PathBuf> = invalidated
                    .iter()
                    .filter(|file| {
                        file.strip_prefix(&read_only_classes_dir).is_ok_and(|rel| {
                            !bookkeeping
                                .generated_relative_paths
                                .contains_key(rel.to_string_lossy().as_ref())
                        })
                    })
                    .cloned()
                    .collect();

                let products = CompileProducts {
                    read_only_classes_dir: read_only_classes_dir.clone(),
                    new_classes_dir,
                    result_for_dependent_compilations,
                    result_for_future_compilations,
                    invalidated_compile_products: invalidated.clone(),
                    generated_relative_class_file_paths: bookkeeping.generated_relative_paths,
                };
                let background_tasks = CompileBackgroundTasks::for_success(
                    read_only_classes_dir,
                    inputs.analysis_out.clone(),
                    rebased_analysis,
                    engine_output.setup,
                    copy_denylist,
                    stale_in_client,
                    bookkeeping.tasks_on_new_analysis,
                    previous_successful_problems,
                    status,
                    inputs.executors.io.clone(),
                    copy_parallelism(),
                );
                CompileResult::Success {
                    inputs: inputs.unique_inputs,
                    reporter: inputs.reporter,
                    products,
                    elapsed,
                    background_tasks,
                    is_no_op: false,
                    reported_fatal_warnings,
                }
            }
        }
        Err(ZincError::CompileCancelled) => {
            cancelled_result(&inputs, &previous_successful_problems, elapsed, &file_manager)
        }
        Err(ZincError::CompileFailed { problems }) => {
            // union of reporter-tracked and engine-reported problems, on
            // problem identity
            let mut all_problems = inputs.reporter.all_problems_per_phase();
            for problem in problems {
                if !all_problems.contains(&problem) {
                    all_problems.push(problem);
                }
            }
            inputs.reporter.process_end_compilation(
                &previous_successful_problems,
                StatusCode::Error,
                None,
                None,
            );
            CompileResult::Failed {
                problems: all_problems,
                cause: None,
                elapsed,
                background_tasks: CompileBackgroundTasks::for_failure(
                    file_manager.drain().tasks_on_failure,
                ),
            }
        }
        Err(err) => {
            error!("unexpected compile failure: {err:?}");
            inputs.reporter.process_end_compilation(
                &previous_successful_problems,
                StatusCode::Error,
                None,
                None,
            );
            CompileResult::Failed {
                problems: Vec::new(),
                cause: Some(Arc::new(err)),
                elapsed,
                background_tasks: CompileBackgroundTasks::for_failure(
                    file_manager.drain().tasks_on_failure,
                ),
            }
        }
    }
}

/// 5. cancellation: process the end inline, hand back the failure tasks.
/// End-of-compilation reporting is owed by the triggered handle, like on the
/// failure path.
fn cancelled_result(
    inputs: &CompileInputs,
    previous_successful_problems: &[Problem],
    elapsed: Duration,
    file_manager: &ClassFileManager,
) -> CompileResult {
    debug!("compilation cancelled after {elapsed:?}");
    inputs.reporter.report_cancelled_compilation();
    inputs.reporter.process_end_compilation(
        previous_successful_problems,
        StatusCode::Cancelled,
        None,
        None,
    );
    CompileResult::Cancelled {
        problems: inputs.reporter.all_problems_per_phase(),
        elapsed,
        background_tasks: CompileBackgroundTasks::for_failure(
            file_manager.drain().tasks_on_failure,
        ),
    }
}

/// Removes `-Xfatal-warnings` from the options and reports whether it was
/// present.
fn split_fatal_warnings(options: Vec<String>) -> (Vec<String>, bool) {
    let enabled = options.iter().any(|opt| opt == FATAL_WARNINGS_FLAG);
    if !enabled {
        return (options, false);
    }
    (options.into_iter().filter(|opt| opt != FATAL_WARNINGS_FLAG).collect(), true)
}

fn copy_parallelism() -> usize {
    num_cpus::get()
}

fn global_error(problem: &str, cause: ZincError) -> CompileResult {
    error!("{problem}: {cause}");
    CompileResult::GlobalError { problem: problem.to_string(), cause: Some(Arc::new(cause)) }
}

/// Runs the shared cancel routine when the compile future is dropped before
/// the engine call resolved.
struct CancelOnDrop {
    cancel: CancelToken,
    reporter: Arc<dyn Reporter>,
    armed: bool,
}

impl CancelOnDrop {
    fn arm(cancel: CancelToken, reporter: Arc<dyn Reporter>) -> Self {
        Self { cancel, reporter, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!("compile task dropped mid-engine-call, cancelling");
            self.cancel.cancel();
            self.reporter.report_cancelled_compilation();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fatal_warnings_flag_is_stripped() {
        let (options, enabled) = split_fatal_warnings(vec![
            "-deprecation".to_string(),
            "-Xfatal-warnings".to_string(),
        ]);
        assert!(enabled);
        assert_eq!(options, vec!["-deprecation".to_string()]);

        let (options, enabled) = split_fatal_warnings(vec!["-deprecation".to_string()]);
        assert!(!enabled);
        assert_eq!(options, vec!["-deprecation".to_string()]);
    }
}
