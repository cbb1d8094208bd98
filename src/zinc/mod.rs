//! The seam to the incremental compilation engine.
//!
//! Everything engine-specific lives behind [`IncrementalEngine`] and the
//! value types in this module, so the orchestrator can be exercised against
//! a fake engine. The engine owns compilation and analysis production; the
//! orchestrator owns directories, cancellation wiring and publication.

use crate::{
    cancel::CancelToken,
    classfiles::ClassFileManager,
    error::Result,
    progress::CompileProgress,
    reporter::Reporter,
    utils,
};
use futures::future::BoxFuture;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

pub mod analysis;
pub use analysis::{Analysis, Relations, SourceInfo, Stamp, Stamps};

/// Process property that disables incremental compilation when set truthy.
pub const ZINC_DISABLED_PROPERTY: &str = "bloop.zinc.disabled";

/// Discriminator written into persisted analysis files.
const ANALYSIS_FORMAT_VERSION: &str = "bloop-zinc-analysis-1";

/// Hash of one classpath entry, as computed by the outer server's classpath
/// fingerprinting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub file: PathBuf,
    pub hash: i64,
}

impl FileHash {
    pub fn new(file: PathBuf, hash: i64) -> Self {
        Self { file, hash }
    }
}

/// The inputs that make a compile unique, used for no-op detection across
/// runs and carried in successful results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniqueCompileInputs {
    pub sources: Vec<PathBuf>,
    pub classpath_hashes: Vec<FileHash>,
    pub scalac_options: Vec<String>,
    pub javac_options: Vec<String>,
}

/// Order in which mixed Scala/Java sources are handed to the compilers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompileOrder {
    #[default]
    Mixed,
    JavaThenScala,
    ScalaThenJava,
}

/// The setup the engine derived for a run; persisted next to the analysis
/// and replayed into future no-op checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileSetup {
    pub compiler_version: Version,
    pub order: CompileOrder,
    pub classpath_hashes: Vec<FileHash>,
}

/// Analysis and setup of a previous run, as the engine wants them back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviousResult {
    pub analysis: Option<Arc<Analysis>>,
    pub setup: Option<CompileSetup>,
}

impl PreviousResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Substitutes the current classpath hashes into the embedded setup.
    ///
    /// Directory entries are dropped from the substituted hashes. Used on
    /// the no-op path so repeated no-op compiles skip the engine's expensive
    /// classpath comparison; every other field is carried over untouched.
    pub fn with_fresh_classpath_hashes(&self, unique_inputs: &UniqueCompileInputs) -> Self {
        let Some(setup) = &self.setup else { return self.clone() };
        let classpath_hashes = unique_inputs
            .classpath_hashes
            .iter()
            .filter(|hash| !hash.file.is_dir())
            .cloned()
            .collect();
        Self {
            analysis: self.analysis.clone(),
            setup: Some(CompileSetup { classpath_hashes, ..setup.clone() }),
        }
    }
}

/// Classpath interpretation toggles forwarded to the engine verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClasspathOptions {
    pub boot_library: bool,
    pub filter_library: bool,
    pub auto_boot: bool,
}

impl Default for ClasspathOptions {
    fn default() -> Self {
        Self { boot_library: true, filter_library: true, auto_boot: true }
    }
}

/// Per-run compile options handed to the engine.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// The only writable destination of this run.
    pub classes_dir: PathBuf,
    pub sources: Vec<PathBuf>,
    pub classpath: Vec<PathBuf>,
    pub scalac_options: Vec<String>,
    pub javac_options: Vec<String>,
    pub order: CompileOrder,
}

/// Incremental-mode switch, honoring [`ZINC_DISABLED_PROPERTY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IncrementalOptions {
    pub enabled: bool,
}

impl IncrementalOptions {
    pub fn create() -> Self {
        let disabled = std::env::var(ZINC_DISABLED_PROPERTY)
            .map(|value| {
                let value = value.trim();
                value.eq_ignore_ascii_case("true") || value == "1"
            })
            .unwrap_or(false);
        if disabled {
            debug!("incremental compilation disabled via {ZINC_DISABLED_PROPERTY}");
        }
        Self { enabled: !disabled }
    }
}

/// The lookup and bookkeeping side of the engine invocation.
#[derive(Clone, Debug)]
pub struct EngineSetup {
    /// Previous results keyed by classes directory. Contains every dependent
    /// project plus this project's own read-only *and* new directories, both
    /// mapped to the previous result.
    pub lookup: BTreeMap<PathBuf, PreviousResult>,
    /// Engine-owned cache file under the project's base directory.
    pub cache_file: PathBuf,
    pub incremental: IncrementalOptions,
    pub progress: Arc<CompileProgress>,
}

/// Everything one engine invocation consumes.
pub struct EngineInputs {
    pub options: CompileOptions,
    pub setup: EngineSetup,
    pub previous_result: PreviousResult,
    pub unique_inputs: UniqueCompileInputs,
    pub reporter: Arc<dyn Reporter>,
    pub file_manager: Arc<ClassFileManager>,
    pub cancel: CancelToken,
    pub classpath_options: ClasspathOptions,
    /// Runtime the engine should schedule its CPU-bound work on.
    pub compute: tokio::runtime::Handle,
}

impl fmt::Debug for EngineInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineInputs")
            .field("options", &self.options)
            .field("setup", &self.setup)
            .field("classpath_options", &self.classpath_options)
            .finish_non_exhaustive()
    }
}

/// Analysis-and-setup produced by a successful engine run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOutput {
    pub analysis: Analysis,
    pub setup: CompileSetup,
}

/// The incremental compilation engine.
///
/// The returned future resolves only after the engine has stopped touching
/// the reporter and the file manager, so the orchestrator may read both once
/// the future completes. Cancellation is cooperative: the engine polls the
/// progress hook and resolves to [`crate::error::ZincError::CompileCancelled`]
/// when told to stop.
pub trait IncrementalEngine: fmt::Debug + Send + Sync {
    fn compile(&self, inputs: EngineInputs) -> BoxFuture<'static, Result<EngineOutput>>;
}

/// On-disk shape of a persisted analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFile {
    #[serde(rename = "_format")]
    pub format: String,
    pub analysis: Analysis,
    pub setup: CompileSetup,
}

/// Persists `analysis` and `setup` to `out`.
///
/// An empty analysis is never persisted; the engine's equality is
/// authoritative for what counts as empty.
#[instrument(skip_all, name = "persist-analysis", fields(out = %out.display()))]
pub fn persist_analysis(analysis: &Analysis, setup: &CompileSetup, out: &Path) -> Result<()> {
    if analysis.is_empty() {
        debug!("skipping persistence of empty analysis for {}", out.display());
        return Ok(());
    }
    utils::create_parent_dir_all(out)?;
    let file = AnalysisFile {
        format: ANALYSIS_FORMAT_VERSION.to_string(),
        analysis: analysis.clone(),
        setup: setup.clone(),
    };
    utils::write_json_file(&file, out, 128 * 1024)?;
    trace!("wrote analysis with {} product stamp(s)", analysis.stamps.products.len());
    Ok(())
}

/// Reads a persisted analysis back. Fails on format mismatch.
pub fn read_analysis(path: &Path) -> Result<AnalysisFile> {
    let file: AnalysisFile = utils::read_json_file(path)?;
    if file.format != ANALYSIS_FORMAT_VERSION {
        return Err(crate::error::ZincError::msg(format!(
            "unsupported analysis format \"{}\" in {}",
            file.format,
            path.display()
        )));
    }
    Ok(file)
}
