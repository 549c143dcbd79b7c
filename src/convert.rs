use camino::Utf8Path;
use rayon::prelude::*;
use tracing::{error, info};

use crate::codec::{self, RecordingCodec};
use crate::config::PipelineConfig;
use crate::domain::RecordingFormat;
use crate::error::PipelineError;
use crate::metadata::patch_sidecar;
use crate::report::{FileOutcome, StageReport};
use crate::tree::DatasetTree;

/// Convert every source recording under `input_root` into the target
/// interchange format at the mirrored path under `output_root`.
///
/// Setup problems (missing input directory, nothing to convert) abort before
/// any file is touched. Per-file problems are recorded and the batch
/// continues; a bad recording never takes the run down with it.
pub fn run_convert(
    config: &PipelineConfig,
    input_root: &Utf8Path,
    output_root: &Utf8Path,
    target: RecordingFormat,
) -> Result<StageReport, PipelineError> {
    let input = DatasetTree::open(input_root)?;
    let output = DatasetTree::create(output_root)?;

    let sources = input.scan_recordings(RecordingFormat::Set)?;
    if sources.is_empty() {
        return Err(PipelineError::NoRecordings(
            input.root().to_owned(),
            RecordingFormat::Set,
        ));
    }
    info!(
        total = sources.len(),
        target = %target,
        "starting format conversion"
    );

    let mut report = StageReport::start("convert", input.root(), output.root());
    let source_codec = codec::for_format(RecordingFormat::Set);
    let target_codec = codec::for_format(target);

    if config.jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.jobs)
            .build()
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        // Workers own their file and their outcome rows; the only shared
        // step is this post-hoc merge.
        let outcomes: Vec<Vec<FileOutcome>> = pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    convert_one(
                        &input,
                        &output,
                        source,
                        source_codec.as_ref(),
                        target_codec.as_ref(),
                    )
                })
                .collect()
        });
        for rows in outcomes {
            report.merge(rows);
        }
    } else {
        for source in &sources {
            report.merge(convert_one(
                &input,
                &output,
                source,
                source_codec.as_ref(),
                target_codec.as_ref(),
            ));
        }
    }

    report.finish();
    info!(
        converted = report.count("converted"),
        skipped = report.count("skipped"),
        failed = report.failed(),
        "conversion finished"
    );
    Ok(report)
}

fn convert_one(
    input: &DatasetTree,
    output: &DatasetTree,
    source: &Utf8Path,
    source_codec: &dyn RecordingCodec,
    target_codec: &dyn RecordingCodec,
) -> Vec<FileOutcome> {
    let relative = input.relative_to(source);
    let dest = input.mirror_recording_path(source, output, target_codec.format());

    // Resume-by-skip: presence of the destination is taken as proof of
    // completion, with no content verification.
    if dest.as_std_path().exists() {
        info!(path = %relative, "destination exists, skipping");
        return vec![FileOutcome::new(relative, "skipped")];
    }

    let recording = match source_codec.read(source) {
        Ok(recording) => recording,
        Err(err) => {
            error!(path = %relative, %err, "failed to load recording");
            return vec![FileOutcome::with_reason(relative, "failed", err.to_string())];
        }
    };
    let (n_channels, n_samples) = (recording.n_channels(), recording.n_samples());

    if let Err(err) = target_codec.write(&recording, &dest) {
        error!(path = %relative, %err, "failed to write recording");
        return vec![FileOutcome::with_reason(relative, "failed", err.to_string())];
    }
    info!(
        path = %relative,
        channels = n_channels,
        samples = n_samples,
        "converted"
    );

    let mut rows = vec![FileOutcome::new(relative, "converted")];
    if let Some(row) = update_sidecar(input, output, source, recording.sample_rate) {
        rows.push(row);
    }
    rows
}

/// Rewrite the recording's own `_eeg.json` into the output tree so its
/// sampling-rate field matches the converted file. Missing sidecars are a
/// warning, never a conversion failure.
fn update_sidecar(
    input: &DatasetTree,
    output: &DatasetTree,
    source: &Utf8Path,
    sample_rate: f64,
) -> Option<FileOutcome> {
    let sidecar = source.with_extension("json");
    if !sidecar.as_std_path().exists() {
        info!(path = %input.relative_to(&sidecar), "no sidecar next to recording");
        return None;
    }
    let relative = input.relative_to(&sidecar).to_owned();
    let dest = output.join(&relative);
    match patch_sidecar(&sidecar, &dest, sample_rate) {
        Ok(()) => Some(FileOutcome::new(&relative, "rewritten")),
        Err(err) => {
            error!(path = %relative, %err, "sidecar left unmodified");
            match crate::tree::copy_file(&sidecar, &dest) {
                Ok(()) => Some(FileOutcome::with_reason(
                    &relative,
                    "warning",
                    format!("copied unchanged: {err}"),
                )),
                Err(copy_err) => Some(FileOutcome::with_reason(
                    &relative,
                    "failed",
                    copy_err.to_string(),
                )),
            }
        }
    }
}
