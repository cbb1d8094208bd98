//! The engine's analysis artifact: stamps, relations and per-source infos.
//!
//! The orchestrator never interprets the analysis beyond what this module
//! exposes: structural equality (the no-op check), problem recovery, and the
//! product-path rebase that keeps the persisted analysis pointing at the
//! current authoritative classes directory.

use crate::{reporter::Problem, utils};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

/// A per-file fingerprint used by the engine to detect change.
///
/// [`Stamp::Empty`] is the sentinel that forces recompilation of the stamped
/// file on the next run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Stamp {
    Hash { hash: String },
    LastModified { millis: u64 },
    Empty,
}

impl Stamp {
    /// Content-hash stamp over raw file contents.
    pub fn hash_of(contents: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(contents);
        Self::Hash { hash: format!("{:x}", hasher.finalize()) }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Stamps for every file the last compile touched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamps {
    pub sources: BTreeMap<PathBuf, Stamp>,
    pub products: BTreeMap<PathBuf, Stamp>,
    pub libraries: BTreeMap<PathBuf, Stamp>,
}

/// Relations tracked by the engine. Only the source→product relation is
/// consumed here; it must stay in lockstep with the product stamps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relations {
    /// Source file to the class files it produced.
    pub products: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

/// Diagnostics the engine attached to a source during the last compile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub reported_problems: Vec<Problem>,
}

/// Structured record of the last compile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub stamps: Stamps,
    pub relations: Relations,
    pub infos: BTreeMap<PathBuf, SourceInfo>,
}

impl Analysis {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The engine's "empty analysis" check; equality against
    /// [`Analysis::empty`] is authoritative.
    pub fn is_empty(&self) -> bool {
        self == &Self::empty()
    }

    /// Recovers the diagnostics reported during the run that produced this
    /// analysis, in source order.
    pub fn all_problems(&self) -> Vec<Problem> {
        self.infos.values().flat_map(|info| info.reported_problems.iter().cloned()).collect()
    }

    /// Rewrites product paths from `read_only_dir` to `new_dir` and empties
    /// the stamps of `fatal_warning_sources`.
    ///
    /// Stamp values of rebased products are preserved: the post-compile copy
    /// carries file metadata over, so the fingerprints stay valid. Library
    /// stamps are never touched. Sources in `fatal_warning_sources` get the
    /// empty stamp so the next run recompiles them even though they did not
    /// change on disk.
    pub fn rebased_products(
        &self,
        read_only_dir: &Path,
        new_dir: &Path,
        fatal_warning_sources: &BTreeSet<PathBuf>,
    ) -> Self {
        let rebase = |path: &Path| -> PathBuf {
            utils::rebase_prefix(path, read_only_dir, new_dir)
                .unwrap_or_else(|| path.to_path_buf())
        };

        let products = self
            .stamps
            .products
            .iter()
            .map(|(path, stamp)| (rebase(path), stamp.clone()))
            .collect();

        let sources = self
            .stamps
            .sources
            .iter()
            .map(|(path, stamp)| {
                let stamp = if fatal_warning_sources.contains(path) {
                    Stamp::Empty
                } else {
                    stamp.clone()
                };
                (path.clone(), stamp)
            })
            .collect();

        let relations = Relations {
            products: self
                .relations
                .products
                .iter()
                .map(|(source, products)| {
                    (source.clone(), products.iter().map(|p| rebase(p)).collect())
                })
                .collect(),
        };

        Self {
            stamps: Stamps { sources, products, libraries: self.stamps.libraries.clone() },
            relations,
            infos: self.infos.clone(),
        }
    }
}
