//! Deferred post-compile I/O, triggered once per interested client.
//!
//! Triggering is the only way directory state becomes visible to a client.
//! Distinct clients may trigger concurrently; the analysis write is shared
//! work and memoized across them, everything else runs per client against
//! that client's external directory.

use crate::{
    classfiles::{BackgroundTaskContext, BackgroundTaskFactory},
    copy,
    error::{Result, ZincError},
    reporter::{Problem, Reporter, StatusCode},
    utils,
    zinc::{self, Analysis, CompileSetup, PreviousResult},
};
use futures::future::{try_join_all, BoxFuture};
use std::{
    collections::HashSet,
    fmt,
    path::PathBuf,
    sync::Arc,
};
use tokio::runtime::Handle;
use tracing::Instrument;

/// Deferred work handle embedded in every result that publishes state.
///
/// [`CompileBackgroundTasks::trigger`] must be called at most once per
/// client; triggers for distinct clients may run in parallel because their
/// destination directories are disjoint.
#[derive(Clone)]
pub struct CompileBackgroundTasks {
    inner: Arc<Inner>,
}

struct Inner {
    kind: TaskKind,
    /// Guards the shared analysis write: the first caller pays the cost,
    /// later callers observe the same outcome.
    persisted: tokio::sync::OnceCell<std::result::Result<(), Arc<ZincError>>>,
}

enum TaskKind {
    Empty,
    NoOp(NoOpTasks),
    Success(SuccessTasks),
    Failed(FailedTasks),
}

struct NoOpTasks {
    new_classes_dir: PathBuf,
    read_only_classes_dir: PathBuf,
    analysis_out: PathBuf,
    previous: PreviousResult,
    previous_problems: Vec<Problem>,
    status: StatusCode,
    io: Handle,
    copy_parallelism: usize,
}

struct SuccessTasks {
    read_only_classes_dir: PathBuf,
    analysis_out: PathBuf,
    analysis: Arc<Analysis>,
    setup: CompileSetup,
    copy_denylist: HashSet<PathBuf>,
    /// Invalidated read-only files without a regenerated counterpart; their
    /// client-side twins are deleted in phase B.
    stale_in_client: HashSet<PathBuf>,
    on_new_analysis: Vec<BackgroundTaskFactory>,
    previous_problems: Vec<Problem>,
    status: StatusCode,
    io: Handle,
    copy_parallelism: usize,
}

struct FailedTasks {
    on_failure: Vec<BackgroundTaskFactory>,
}

impl CompileBackgroundTasks {
    /// A handle with no work behind it.
    pub fn empty() -> Self {
        Self::new(TaskKind::Empty)
    }

    /// Tasks for a compile whose analysis matched the previous run: drop the
    /// unused fresh directory, publish the read-only directory, and persist
    /// the previous analysis if none is on disk yet.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn for_no_op(
        new_classes_dir: PathBuf,
        read_only_classes_dir: PathBuf,
        analysis_out: PathBuf,
        previous: PreviousResult,
        previous_problems: Vec<Problem>,
        status: StatusCode,
        io: Handle,
        copy_parallelism: usize,
    ) -> Self {
        Self::new(TaskKind::NoOp(NoOpTasks {
            new_classes_dir,
            read_only_classes_dir,
            analysis_out,
            previous,
            previous_problems,
            status,
            io,
            copy_parallelism,
        }))
    }

    /// Tasks for a compile that produced a new analysis.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn for_success(
        read_only_classes_dir: PathBuf,
        analysis_out: PathBuf,
        analysis: Arc<Analysis>,
        setup: CompileSetup,
        copy_denylist: HashSet<PathBuf>,
        stale_in_client: HashSet<PathBuf>,
        on_new_analysis: Vec<BackgroundTaskFactory>,
        previous_problems: Vec<Problem>,
        status: StatusCode,
        io: Handle,
        copy_parallelism: usize,
    ) -> Self {
        Self::new(TaskKind::Success(SuccessTasks {
            read_only_classes_dir,
            analysis_out,
            analysis,
            setup,
            copy_denylist,
            stale_in_client,
            on_new_analysis,
            previous_problems,
            status,
            io,
            copy_parallelism,
        }))
    }

    /// Tasks for a failed or cancelled compile.
    pub(crate) fn for_failure(on_failure: Vec<BackgroundTaskFactory>) -> Self {
        Self::new(TaskKind::Failed(FailedTasks { on_failure }))
    }

    fn new(kind: TaskKind) -> Self {
        Self { inner: Arc::new(Inner { kind, persisted: tokio::sync::OnceCell::new() }) }
    }

    /// Runs the background work for one client.
    ///
    /// On any error the error is logged and propagated, and
    /// `report_end_compilation` still fires exactly once.
    pub fn trigger(
        &self,
        client_classes_dir: PathBuf,
        reporter: Arc<dyn Reporter>,
        span: tracing::Span,
    ) -> BoxFuture<'static, Result<()>> {
        let inner = self.inner.clone();
        Box::pin(
            async move {
                let ctx = BackgroundTaskContext {
                    client_classes_dir,
                    reporter: reporter.clone(),
                    span: tracing::Span::current(),
                };
                let result = inner.run(&ctx).await;
                if let Err(err) = &result {
                    error!("background compile tasks failed: {err}");
                }
                reporter.report_end_compilation();
                result
            }
            .instrument(span),
        )
    }
}

impl Inner {
    async fn run(&self, ctx: &BackgroundTaskContext) -> Result<()> {
        match &self.kind {
            TaskKind::Empty => Ok(()),
            TaskKind::Failed(tasks) => {
                try_join_all(tasks.on_failure.iter().map(|factory| factory(ctx))).await?;
                Ok(())
            }
            TaskKind::NoOp(tasks) => self.run_no_op(tasks, ctx).await,
            TaskKind::Success(tasks) => self.run_success(tasks, ctx).await,
        }
    }

    async fn run_no_op(&self, tasks: &NoOpTasks, ctx: &BackgroundTaskContext) -> Result<()> {
        let delete_fresh_dir = {
            let dir = tasks.new_classes_dir.clone();
            run_blocking(&tasks.io, move || utils::remove_dir_all_if_exists(&dir))
        };
        let populate_client_dir = {
            let from = tasks.read_only_classes_dir.clone();
            let to = ctx.client_classes_dir.clone();
            let parallelism = tasks.copy_parallelism;
            run_blocking(&tasks.io, move || {
                copy::copy_directory_contents(&from, &to, &HashSet::new(), parallelism)
            })
        };
        let persist_if_missing = async {
            match (&tasks.previous.analysis, &tasks.previous.setup) {
                (Some(analysis), Some(setup)) if !tasks.analysis_out.exists() => {
                    self.persist_memoized(
                        analysis.clone(),
                        setup.clone(),
                        tasks.analysis_out.clone(),
                        tasks.io.clone(),
                    )
                    .await
                }
                _ => Ok(()),
            }
        };

        futures::try_join!(delete_fresh_dir, populate_client_dir, persist_if_missing)?;

        ctx.reporter.process_end_compilation(
            &tasks.previous_problems,
            tasks.status,
            Some(&ctx.client_classes_dir),
            Some(&tasks.analysis_out),
        );
        Ok(())
    }

    async fn run_success(&self, tasks: &SuccessTasks, ctx: &BackgroundTaskContext) -> Result<()> {
        // Phase A: the analysis write and the per-client finalizers of the
        // file manager may run together.
        let persist = self.persist_memoized(
            tasks.analysis.clone(),
            tasks.setup.clone(),
            tasks.analysis_out.clone(),
            tasks.io.clone(),
        );
        let finalizers = try_join_all(tasks.on_new_analysis.iter().map(|factory| factory(ctx)));
        futures::try_join!(persist, finalizers)?;

        // Phase B observes phase A: the copy must not race the finalizers
        // that put artifacts into the directories it reads.
        let populate_client_dir = {
            let from = tasks.read_only_classes_dir.clone();
            let to = ctx.client_classes_dir.clone();
            let deny = tasks.copy_denylist.clone();
            let parallelism = tasks.copy_parallelism;
            run_blocking(&tasks.io, move || {
                copy::copy_directory_contents(&from, &to, &deny, parallelism)
            })
        };
        let delete_stale = {
            let read_only = tasks.read_only_classes_dir.clone();
            let client = ctx.client_classes_dir.clone();
            let stale = tasks.stale_in_client.clone();
            run_blocking(&tasks.io, move || {
                for file in &stale {
                    if let Some(stale_file) = utils::rebase_prefix(file, &read_only, &client) {
                        utils::remove_file_if_exists(&stale_file)?;
                    }
                }
                Ok(())
            })
        };
        futures::try_join!(populate_client_dir, delete_stale)?;

        ctx.reporter.process_end_compilation(
            &tasks.previous_problems,
            tasks.status,
            Some(&ctx.client_classes_dir),
            Some(&tasks.analysis_out),
        );
        Ok(())
    }

    async fn persist_memoized(
        &self,
        analysis: Arc<Analysis>,
        setup: CompileSetup,
        out: PathBuf,
        io: Handle,
    ) -> Result<()> {
        let outcome = self
            .persisted
            .get_or_init(|| async move {
                match io
                    .spawn_blocking(move || zinc::persist_analysis(&analysis, &setup, &out))
                    .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(Arc::new(err)),
                    Err(join) => {
                        Err(Arc::new(ZincError::msg(format!("analysis write panicked: {join}"))))
                    }
                }
            })
            .await;
        outcome.clone().map_err(ZincError::from)
    }
}

async fn run_blocking<T, F>(io: &Handle, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    io.spawn_blocking(f)
        .await
        .map_err(|err| ZincError::msg(format!("background I/O task panicked: {err}")))?
}

impl fmt::Debug for CompileBackgroundTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.kind {
            TaskKind::Empty => "empty",
            TaskKind::NoOp(_) => "no-op",
            TaskKind::Success(_) => "success",
            TaskKind::Failed(_) => "failed",
        };
        f.debug_struct("CompileBackgroundTasks").field("kind", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_handle_is_cheap_to_clone() {
        let tasks = CompileBackgroundTasks::empty();
        let clone = tasks.clone();
        assert!(Arc::ptr_eq(&tasks.inner, &clone.inner));
    }
}
