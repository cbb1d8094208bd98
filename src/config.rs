//! Output directory layout for a single incremental compile.
//!
//! Every compile works against three directories:
//!
//! - the *external* classes directory, a stable per-client path that outside
//!   readers observe,
//! - the *read-only* classes directory, produced by the previous successful
//!   run and never written by the current one,
//! - the *new* classes directory, created fresh per run and the only write
//!   destination while the engine is running.
//!
//! The new directory of run N becomes the read-only directory of run N+1.
//! Run directories live under `<out>/bloop-internal-classes/` and carry a
//! `<externalName>-<uuid>` name, which is what orphan cleanup keys on.

use crate::{
    error::{Result, ZincError},
    utils,
};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf, MAIN_SEPARATOR},
};

/// Name of the directory under `<out>` that parents all run directories.
pub const INTERNAL_CLASSES_DIR_NAME: &str = "bloop-internal-classes";

/// Name prefix marking a path as an empty-classes-dir sentinel.
pub const EMPTY_CLASSES_DIR_PREFIX: &str = "classes-empty-";

/// Matches the `-<uuid>` suffix of a run directory name.
static RE_RUN_DIR_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

/// The directories used by one compile.
///
/// `internal_new_classes_dir` is allocated lazily so that callers which end
/// up not compiling (e.g. blocked requests) never create it.
#[derive(Clone, Debug)]
pub struct CompileOutPaths {
    /// The `<out>` directory the internal root lives under.
    pub out_dir: PathBuf,
    /// Stable per-(project, client) directory visible to outside readers.
    pub external_classes_dir: PathBuf,
    /// Output of the previous successful run. The engine may read it but
    /// must never write it.
    pub internal_read_only_classes_dir: PathBuf,
    internal_new_classes_dir: OnceCell<PathBuf>,
    internal_new_pickles_dir: OnceCell<PathBuf>,
}

impl CompileOutPaths {
    pub fn new(
        out_dir: PathBuf,
        external_classes_dir: PathBuf,
        internal_read_only_classes_dir: PathBuf,
    ) -> Self {
        Self {
            out_dir,
            external_classes_dir,
            internal_read_only_classes_dir,
            internal_new_classes_dir: OnceCell::new(),
            internal_new_pickles_dir: OnceCell::new(),
        }
    }

    /// Creates `<out>/bloop-internal-classes` and returns it.
    pub fn create_internal_classes_root_dir(out: &Path) -> Result<PathBuf> {
        let root = out.join(INTERNAL_CLASSES_DIR_NAME);
        fs::create_dir_all(&root).map_err(|err| ZincError::io(err, &root))?;
        Ok(root)
    }

    /// The final segment of the external classes directory, used to attribute
    /// run directories to their client-visible counterpart.
    pub fn external_name(&self) -> String {
        self.external_classes_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "classes".to_string())
    }

    /// The fresh, run-unique output directory.
    ///
    /// Created on first access as
    /// `<out>/bloop-internal-classes/<externalName>-<uuid>` and canonicalized
    /// so the engine and the analysis agree on one spelling of the path.
    pub fn internal_new_classes_dir(&self) -> Result<&Path> {
        self.internal_new_classes_dir
            .get_or_try_init(|| {
                let root = Self::create_internal_classes_root_dir(&self.out_dir)?;
                let dir = root.join(format!("{}-{}", self.external_name(), uuid::Uuid::new_v4()));
                fs::create_dir_all(&dir).map_err(|err| ZincError::io(err, &dir))?;
                let dir = utils::canonicalize(&dir)?;
                trace!("created fresh classes dir {}", dir.display());
                Ok(dir)
            })
            .map(PathBuf::as_path)
    }

    /// Sibling of [`Self::internal_new_classes_dir`] for pickle files.
    ///
    /// The name substitutes `classes` with `pickles`, or prepends `pickles-`
    /// when the new dir name does not mention `classes` at all.
    pub fn internal_new_pickles_dir(&self) -> Result<&Path> {
        self.internal_new_pickles_dir
            .get_or_try_init(|| {
                let classes_dir = self.internal_new_classes_dir()?;
                let classes_name = classes_dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let pickles_name = if classes_name.contains("classes") {
                    classes_name.replace("classes", "pickles")
                } else {
                    format!("pickles-{classes_name}")
                };
                let dir = classes_dir
                    .parent()
                    .unwrap_or(classes_dir)
                    .join(pickles_name);
                fs::create_dir_all(&dir).map_err(|err| ZincError::io(err, &dir))?;
                Ok(dir)
            })
            .map(PathBuf::as_path)
    }

    /// Derives the empty-classes-dir sentinel next to `generic_classes_dir`.
    ///
    /// The sentinel is never created on disk; it only exists so the engine's
    /// classpath lookup can recognize "no classes yet" entries.
    pub fn derive_empty_classes_dir(project_name: &str, generic_classes_dir: &Path) -> PathBuf {
        generic_classes_dir
            .parent()
            .unwrap_or(generic_classes_dir)
            .join(format!("{EMPTY_CLASSES_DIR_PREFIX}{project_name}"))
    }

    /// Whether `path` is an empty-classes-dir sentinel.
    ///
    /// Matched by substring rather than final segment because project names
    /// may themselves contain path separators.
    pub fn has_empty_classes_dir(path: &Path) -> bool {
        let needle = format!("{MAIN_SEPARATOR}{EMPTY_CLASSES_DIR_PREFIX}");
        path.to_string_lossy().contains(&needle)
    }
}

/// Lists run directories under `root` that are not in `live`.
///
/// Run directories are recognized purely by the `<externalName>-<uuid>`
/// naming convention, so directories orphaned by an abrupt process kill show
/// up here and can be garbage collected by the caller.
pub fn stale_run_dirs(root: &Path, live: &HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ZincError::io(err, root)),
    };

    let mut stale = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ZincError::io(err, root))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
            continue;
        };
        if RE_RUN_DIR_SUFFIX.is_match(&name) && !live.contains(&path) {
            stale.push(path);
        }
    }
    stale.sort();
    Ok(stale)
}
