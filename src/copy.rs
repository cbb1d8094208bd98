//! Metadata-preserving directory copy used to publish compile outputs into
//! client-visible directories.
//!
//! The copy never deletes anything; stale-file deletion is a separate
//! background task. Entries are replaced only when their metadata (length
//! and mtime) differs from the source, so re-publishing an unchanged run is
//! a metadata-only pass.

use crate::error::{Result, ZincError};
use rayon::prelude::*;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::{Duration, UNIX_EPOCH},
};
use walkdir::WalkDir;

/// Outcome counters of one copy pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopySummary {
    /// Files written to the destination.
    pub copied: usize,
    /// Files skipped because destination metadata already matched.
    pub fresh: usize,
    /// Files skipped because their source path was denied.
    pub denied: usize,
}

/// Copies every file under `from` into `to`, preserving file mtimes.
///
/// `deny` holds absolute *source* paths that must not reach the destination,
/// regardless of metadata. `parallelism` bounds the worker pool used for the
/// file copies themselves.
#[instrument(skip_all, name = "copy-directory", fields(from = %from.display(), to = %to.display()))]
pub fn copy_directory_contents(
    from: &Path,
    to: &Path,
    deny: &HashSet<PathBuf>,
    parallelism: usize,
) -> Result<CopySummary> {
    if crate::config::CompileOutPaths::has_empty_classes_dir(from) || !from.exists() {
        trace!("nothing to copy from {}", from.display());
        return Ok(CopySummary::default());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|err| ZincError::msg(err))?;
        let rel = match entry.path().strip_prefix(from) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };
        let dest = to.join(&rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|err| ZincError::io(err, &dest))?;
        } else if entry.file_type().is_file() {
            files.push((entry.into_path(), dest));
        }
    }

    let copy_one = |src: &Path, dest: &Path| -> Result<CopySummary> {
        if deny.contains(src) {
            return Ok(CopySummary { denied: 1, ..Default::default() });
        }
        let src_meta = fs::metadata(src).map_err(|err| ZincError::io(err, src))?;
        if is_fresh(&src_meta, dest) {
            return Ok(CopySummary { fresh: 1, ..Default::default() });
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| ZincError::io(err, parent))?;
        }
        fs::copy(src, dest).map_err(|err| ZincError::io(err, dest))?;
        if let Ok(modified) = src_meta.modified() {
            let dest_file = fs::OpenOptions::new()
                .write(true)
                .open(dest)
                .map_err(|err| ZincError::io(err, dest))?;
            dest_file.set_modified(modified).map_err(|err| ZincError::io(err, dest))?;
        }
        Ok(CopySummary { copied: 1, ..Default::default() })
    };

    let summaries: Vec<CopySummary> = if parallelism > 1 && files.len() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .map_err(|err| ZincError::msg(err))?;
        pool.install(|| {
            files
                .par_iter()
                .map(|(src, dest)| copy_one(src, dest))
                .collect::<Result<Vec<_>>>()
        })?
    } else {
        files
            .iter()
            .map(|(src, dest)| copy_one(src, dest))
            .collect::<Result<Vec<_>>>()?
    };

    let total = summaries.iter().fold(CopySummary::default(), |acc, s| CopySummary {
        copied: acc.copied + s.copied,
        fresh: acc.fresh + s.fresh,
        denied: acc.denied + s.denied,
    });
    trace!(
        "copied {} file(s), {} fresh, {} denied",
        total.copied,
        total.fresh,
        total.denied
    );
    Ok(total)
}

/// Whether `dest` already matches the source metadata (length and mtime in
/// whole seconds, which is what survives every file system).
fn is_fresh(src_meta: &fs::Metadata, dest: &Path) -> bool {
    let Ok(dest_meta) = fs::metadata(dest) else { return false };
    if dest_meta.len() != src_meta.len() {
        return false;
    }
    match (src_meta.modified(), dest_meta.modified()) {
        (Ok(src), Ok(dest)) => seconds_since_epoch(src) == seconds_since_epoch(dest),
        _ => false,
    }
}

fn seconds_since_epoch(time: std::time::SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}
