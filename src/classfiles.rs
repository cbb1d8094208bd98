//! Engine-facing class file manager and the per-run bookkeeping it owns.
//!
//! The engine calls into the manager while compiling to announce invalidated
//! and freshly generated class files. The accumulated bookkeeping is drained
//! exactly once after the engine returns, when the background tasks for the
//! outcome are assembled. Nothing in here outlives its compile.

use crate::error::{Result, ZincError};
use futures::future::BoxFuture;
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    mem,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Client-scoped context handed to background-task factories at trigger
/// time.
#[derive(Clone, Debug)]
pub struct BackgroundTaskContext {
    pub client_classes_dir: PathBuf,
    pub reporter: Arc<dyn crate::reporter::Reporter>,
    pub span: tracing::Span,
}

/// A deferred background action, instantiated once per triggering client.
pub type BackgroundTaskFactory =
    Arc<dyn Fn(&BackgroundTaskContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Mutable state accumulated by one compile.
#[derive(Default)]
pub struct RunBookkeeping {
    /// Generated class files keyed by their path relative to the new classes
    /// directory, for consumers that discover artifacts after the fact.
    pub generated_relative_paths: BTreeMap<String, PathBuf>,
    /// Read-only paths the post-compile copier must not resurrect.
    pub readonly_copy_denylist: HashSet<PathBuf>,
    pub invalidated_class_files: HashSet<PathBuf>,
    pub invalidated_extra_products: HashSet<PathBuf>,
    /// Runs only when the compile produced a new analysis.
    pub tasks_on_new_analysis: Vec<BackgroundTaskFactory>,
    /// Runs only when the compile failed or was cancelled.
    pub tasks_on_failure: Vec<BackgroundTaskFactory>,
}

impl fmt::Debug for RunBookkeeping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunBookkeeping")
            .field("generated_relative_paths", &self.generated_relative_paths)
            .field("readonly_copy_denylist", &self.readonly_copy_denylist)
            .field("invalidated_class_files", &self.invalidated_class_files)
            .field("invalidated_extra_products", &self.invalidated_extra_products)
            .field("tasks_on_new_analysis", &self.tasks_on_new_analysis.len())
            .field("tasks_on_failure", &self.tasks_on_failure.len())
            .finish()
    }
}

/// Records what the engine invalidates and generates during one compile.
///
/// A fresh manager is created per run with a private temp dir backing the
/// removal of outdated class files from the new directory.
#[derive(Debug)]
pub struct ClassFileManager {
    new_classes_dir: PathBuf,
    read_only_classes_dir: PathBuf,
    backup_dir: tempfile::TempDir,
    state: Mutex<RunBookkeeping>,
}

impl ClassFileManager {
    pub fn new(
        new_classes_dir: PathBuf,
        read_only_classes_dir: PathBuf,
        invalidated_by_dependents: HashSet<PathBuf>,
        denied_by_dependents: HashSet<PathBuf>,
    ) -> Result<Self> {
        let backup_dir = tempfile::Builder::new()
            .prefix("classes-backup-")
            .tempdir()
            .map_err(|err| ZincError::msg(format!("failed to create backup dir: {err}")))?;
        let state = RunBookkeeping {
            invalidated_class_files: invalidated_by_dependents,
            readonly_copy_denylist: denied_by_dependents,
            ..Default::default()
        };
        Ok(Self {
            new_classes_dir,
            read_only_classes_dir,
            backup_dir,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunBookkeeping> {
        // per-run state; a poisoned lock means a reporter or engine callback
        // panicked and the run is already lost
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The engine invalidated `class_files`.
    ///
    /// Read-only hits are denied to the post-compile copier; hits in the new
    /// directory are moved aside into the private temp dir so the engine
    /// never observes a stale product there.
    pub fn delete(&self, class_files: &[PathBuf]) {
        let mut state = self.lock();
        for class_file in class_files {
            state.invalidated_class_files.insert(class_file.clone());
            if class_file.starts_with(&self.read_only_classes_dir) {
                state.readonly_copy_denylist.insert(class_file.clone());
            } else if class_file.starts_with(&self.new_classes_dir) && class_file.exists() {
                let backup = self.backup_dir.path().join(format!(
                    "{}-{}",
                    state.invalidated_class_files.len(),
                    class_file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                ));
                if let Err(err) = std::fs::rename(class_file, &backup) {
                    warn!(
                        "failed to move invalidated {} aside: {err}",
                        class_file.display()
                    );
                }
            }
        }
    }

    /// The engine wrote `class_files` into the new classes directory.
    ///
    /// Besides the bookkeeping, every batch registers a finalizer that puts
    /// the generated files into the triggering client's directory once the
    /// new analysis is known good; the read-only copy pass never sees them.
    pub fn generated(&self, class_files: &[PathBuf]) {
        let mut state = self.lock();
        let mut batch = Vec::with_capacity(class_files.len());
        for class_file in class_files {
            let Ok(relative) = class_file.strip_prefix(&self.new_classes_dir) else {
                warn!(
                    "generated class file {} outside of {}",
                    class_file.display(),
                    self.new_classes_dir.display()
                );
                continue;
            };
            state
                .generated_relative_paths
                .insert(relative.to_string_lossy().into_owned(), class_file.clone());
            batch.push((relative.to_path_buf(), class_file.clone()));
            // a regenerated class shadows its read-only counterpart
            let shadowed = self.read_only_classes_dir.join(relative);
            if shadowed.exists() {
                state.readonly_copy_denylist.insert(shadowed);
            }
        }
        if batch.is_empty() {
            return;
        }
        let factory: BackgroundTaskFactory = Arc::new(move |ctx: &BackgroundTaskContext| {
            let batch = batch.clone();
            let client_dir = ctx.client_classes_dir.clone();
            Box::pin(async move {
                for (relative, class_file) in &batch {
                    let dest = client_dir.join(relative);
                    crate::utils::create_parent_dir_all(&dest)?;
                    std::fs::copy(class_file, &dest)
                        .map_err(|err| ZincError::io(err, &dest))?;
                }
                Ok(())
            })
        });
        state.tasks_on_new_analysis.push(factory);
    }

    /// The engine invalidated non-class compile products (tasty, semanticdb,
    /// ...).
    pub fn invalidated_extra_products(&self, files: &[PathBuf]) {
        let mut state = self.lock();
        for file in files {
            state.invalidated_extra_products.insert(file.clone());
        }
    }

    /// End-of-run notification from the engine.
    pub fn complete(&self, success: bool) {
        trace!(
            "class file manager completed, success = {success}, {} generated",
            self.lock().generated_relative_paths.len()
        );
    }

    /// Registers a task that must run, per client, once a new analysis is
    /// known good.
    pub fn add_task_on_new_analysis(&self, factory: BackgroundTaskFactory) {
        self.lock().tasks_on_new_analysis.push(factory);
    }

    /// Registers a task that must run, per client, when the compile fails.
    pub fn add_task_on_failure(&self, factory: BackgroundTaskFactory) {
        self.lock().tasks_on_failure.push(factory);
    }

    pub fn new_classes_dir(&self) -> &Path {
        &self.new_classes_dir
    }

    /// Consumes the accumulated bookkeeping. Later engine callbacks land in
    /// a fresh value that nobody reads.
    pub(crate) fn drain(&self) -> RunBookkeeping {
        mem::take(&mut *self.lock())
    }
}
