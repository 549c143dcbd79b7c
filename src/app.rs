//! Resampling orchestration.
//!
//! The heavy filtering/resampling lives behind [`SignalToolbox`]; this
//! module sequences it per recording and runs the metadata pass over the
//! same tree, mirroring how the converter and rewriter split the work.

use camino::Utf8Path;
use tracing::{error, info, warn};

use crate::codec;
use crate::domain::RecordingFormat;
use crate::error::PipelineError;
use crate::metadata;
use crate::report::{FileOutcome, StageReport};
use crate::toolbox::{SignalToolbox, ToolboxSession};
use crate::tree::DatasetTree;

#[derive(Debug)]
pub struct ResampleOutcome {
    pub recordings: StageReport,
    pub metadata: StageReport,
}

/// Filter and resample every recording under `input_root` into
/// `output_root` as `target` interchange files, then rewrite the tree's
/// metadata for the new rate.
///
/// The toolbox handle is acquired for the whole run and released when this
/// function returns, interrupted or not.
pub fn run_resample<T: SignalToolbox + ?Sized>(
    toolbox: &T,
    input_root: &Utf8Path,
    output_root: &Utf8Path,
    target: RecordingFormat,
    band: (f64, f64),
    target_rate: f64,
) -> Result<ResampleOutcome, PipelineError> {
    let session = ToolboxSession::acquire(toolbox);
    let input = DatasetTree::open(input_root)?;
    let output = DatasetTree::create(output_root)?;

    let sources = input.scan_recordings(RecordingFormat::Set)?;
    if sources.is_empty() {
        return Err(PipelineError::NoRecordings(
            input.root().to_owned(),
            RecordingFormat::Set,
        ));
    }

    let source_codec = codec::for_format(RecordingFormat::Set);
    let target_codec = codec::for_format(target);
    let mut recordings = StageReport::start("resample", input.root(), output.root());

    for source in &sources {
        let relative = input.relative_to(source);
        let dest = input.mirror_recording_path(source, &output, target);
        if dest.as_std_path().exists() {
            info!(path = %relative, "destination exists, skipping");
            recordings.record(FileOutcome::new(relative, "skipped"));
            continue;
        }

        let outcome = (|| -> Result<(), PipelineError> {
            let recording = source_codec.read(source)?;
            let mut resampled =
                session
                    .toolbox()
                    .filter_resample(&recording, band, target_rate)?;
            let dropped = resampled.retain_valid_events();
            if dropped > 0 {
                warn!(path = %relative, dropped, "dropped events outside the resampled range");
            }
            target_codec.write(&resampled, &dest)
        })();

        match outcome {
            Ok(()) => {
                info!(path = %relative, rate = target_rate, "resampled");
                recordings.record(FileOutcome::new(relative, "resampled"));
            }
            Err(err) => {
                error!(path = %relative, %err, "resampling failed");
                recordings.record(FileOutcome::with_reason(relative, "failed", err.to_string()));
            }
        }
    }
    recordings.finish();

    let metadata = metadata::run_rewrite(input_root, output_root, target_rate)?;

    Ok(ResampleOutcome {
        recordings,
        metadata,
    })
}
