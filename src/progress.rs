//! Bridges the engine's progress callbacks to the reporter and the
//! cancellation flag.

use crate::{cancel::CancelToken, reporter::Reporter};
use std::{path::Path, sync::Arc};

/// Engine-facing progress hook for one compile.
///
/// The engine polls [`CompileProgress::advance`] between phases and aborts
/// cooperatively once it returns `false`.
#[derive(Clone, Debug)]
pub struct CompileProgress {
    reporter: Arc<dyn Reporter>,
    cancel: CancelToken,
}

impl CompileProgress {
    pub fn new(reporter: Arc<dyn Reporter>, cancel: CancelToken) -> Self {
        Self { reporter, cancel }
    }

    /// The engine is about to process `unit_path` in `phase`.
    pub fn start_unit(&self, phase: &str, unit_path: &Path) {
        self.reporter.report_next_phase(phase, unit_path);
    }

    /// Progress tick. Reports to the reporter only while the compile has not
    /// been cancelled; the return value tells the engine whether to keep
    /// going.
    pub fn advance(&self, current: u64, total: u64, _prev_phase: &str, _next_phase: &str) -> bool {
        if self.cancel.is_cancelled() {
            false
        } else {
            self.reporter.report_compilation_progress(current, total);
            true
        }
    }
}
