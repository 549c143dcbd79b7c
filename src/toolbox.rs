//! Seam for the external filter/resample toolbox.
//!
//! The numerically-intensive work is delegated wholesale: implementations
//! wrap whatever engine actually does the filtering, and the pipeline only
//! sequences calls and bookkeeps the results.

use tracing::info;

use crate::error::PipelineError;
use crate::recording::Recording;

pub trait SignalToolbox {
    /// Bandpass-filter and resample one recording.
    ///
    /// Channel order and labels must be preserved; the returned recording
    /// carries `target_rate` and a proportionally scaled sample count.
    /// Event latencies are rescaled by the implementation; range validation
    /// stays with the caller.
    fn filter_resample(
        &self,
        recording: &Recording,
        band: (f64, f64),
        target_rate: f64,
    ) -> Result<Recording, PipelineError>;

    /// Human-readable engine identity, for reports and logs.
    fn name(&self) -> &str;
}

/// Scoped hold on the toolbox's process-wide state (engine session,
/// activated environment). Acquired once at pipeline start and released on
/// drop rather than living as ambient global state.
pub struct ToolboxSession<'a, T: SignalToolbox + ?Sized> {
    toolbox: &'a T,
}

impl<'a, T: SignalToolbox + ?Sized> ToolboxSession<'a, T> {
    pub fn acquire(toolbox: &'a T) -> Self {
        info!(engine = toolbox.name(), "toolbox session acquired");
        Self { toolbox }
    }

    pub fn toolbox(&self) -> &T {
        self.toolbox
    }
}

impl<T: SignalToolbox + ?Sized> Drop for ToolboxSession<'_, T> {
    fn drop(&mut self) {
        info!(engine = self.toolbox.name(), "toolbox session released");
    }
}
