//! Recording container codecs.
//!
//! The pipeline talks to container formats through [`RecordingCodec`], one
//! implementation per on-disk format. The converter and comparator never see
//! header layouts or bit packing.

pub mod edf;
pub mod set;

use camino::Utf8Path;

use crate::domain::RecordingFormat;
use crate::error::PipelineError;
use crate::recording::{Recording, RecordingInfo};

pub trait RecordingCodec: Send + Sync {
    fn format(&self) -> RecordingFormat;

    /// Header-only load: channel count, sample count and rate.
    fn probe(&self, path: &Utf8Path) -> Result<RecordingInfo, PipelineError>;

    /// Load the full recording. Out-of-range events are dropped here so no
    /// downstream consumer ever sees a latency outside `[1, n_samples]`.
    fn read(&self, path: &Utf8Path) -> Result<Recording, PipelineError>;

    fn write(&self, recording: &Recording, path: &Utf8Path) -> Result<(), PipelineError>;
}

pub fn for_format(format: RecordingFormat) -> Box<dyn RecordingCodec> {
    match format {
        RecordingFormat::Set => Box::new(set::SetCodec),
        RecordingFormat::Edf => Box::new(edf::EdfCodec::edf()),
        RecordingFormat::Bdf => Box::new(edf::EdfCodec::bdf()),
    }
}
