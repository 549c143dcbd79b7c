use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::codec;
use crate::config::PipelineConfig;
use crate::domain::RecordingKey;
use crate::error::PipelineError;
use crate::plot;
use crate::recording::Recording;
use crate::report::{
    mean, ChannelMetrics, CompareReport, FileComparison, FileOutcome, FormatMetrics,
};
use crate::tree::DatasetTree;

/// Compare original recordings against their converted counterparts.
///
/// Reads only; the sole outputs are the JSON report and the per-file SVG
/// artifacts under `out_dir`.
pub fn run_compare(
    config: &PipelineConfig,
    original_root: &Utf8Path,
    converted_roots: &[Utf8PathBuf],
    out_dir: &Utf8Path,
) -> Result<CompareReport, PipelineError> {
    let original = DatasetTree::open(original_root)?;
    let original_format = original.detect_format()?;
    let original_codec = codec::for_format(original_format);

    let mut converted = Vec::new();
    for root in converted_roots {
        let tree = DatasetTree::open(root)?;
        let format = tree.detect_format()?;
        converted.push((tree, format, codec::for_format(format)));
    }

    let mut report = CompareReport::start(original.root(), converted_roots);

    // Keys present in the original and every converted root; discovery is
    // sorted, so the bounded selection below is reproducible across runs.
    let candidates: Vec<(Utf8PathBuf, RecordingKey)> = original
        .scan_recordings(original_format)?
        .into_iter()
        .filter_map(|source| match RecordingKey::from_path(&source) {
            Ok(key) => Some((source, key)),
            Err(err) => {
                warn!(path = %source, %err, "recording outside the naming convention, ignoring");
                None
            }
        })
        .filter(|(source, _)| {
            converted.iter().all(|(tree, format, _)| {
                original
                    .mirror_recording_path(source, tree, *format)
                    .as_std_path()
                    .exists()
            })
        })
        .collect();
    if candidates.is_empty() {
        return Err(PipelineError::NoRecordings(
            original.root().to_owned(),
            original_format,
        ));
    }

    let selected = strided_selection(&candidates, config.max_compare_files);
    info!(
        candidates = candidates.len(),
        selected = selected.len(),
        "comparing recording sets"
    );

    for (index, (source, key)) in selected.iter().enumerate() {
        let relative = original.relative_to(source).to_owned();

        let original_recording = match original_codec.read(source) {
            Ok(recording) => recording,
            Err(err) => {
                warn!(path = %relative, %err, "original unreadable, skipping");
                report
                    .skipped
                    .push(FileOutcome::with_reason(&relative, "skipped", err.to_string()));
                continue;
            }
        };

        let mut loaded = Vec::new();
        let mut failed = None;
        for (tree, format, codec) in &converted {
            let path = original.mirror_recording_path(source, tree, *format);
            match codec.read(&path) {
                Ok(recording) => loaded.push((format.to_string(), recording)),
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failed {
            warn!(path = %relative, %err, "converted file unreadable, skipping");
            report
                .skipped
                .push(FileOutcome::with_reason(&relative, "skipped", err.to_string()));
            continue;
        }

        match compare_one(key, &relative, &original_recording, &loaded) {
            Some(comparison) => {
                if config.plots {
                    let plot_dir = out_dir.join(format!("file_{:02}", index + 1));
                    if let Err(err) = plot::render_file_plots(
                        &plot_dir,
                        &comparison,
                        &original_recording,
                        &loaded,
                    ) {
                        warn!(path = %relative, %err, "plot rendering failed");
                    }
                }
                report.files.push(comparison);
            }
            None => {
                warn!(path = %relative, "no common channels, skipping");
                report.skipped.push(FileOutcome::with_reason(
                    &relative,
                    "skipped",
                    "no common channels",
                ));
            }
        }
    }

    report.finish();
    let path = report.save(out_dir)?;
    info!(report = %path, files = report.files.len(), "comparison finished");
    Ok(report)
}

/// Evenly strided subset of at most `max` entries.
fn strided_selection<T: Clone>(candidates: &[T], max: usize) -> Vec<T> {
    if max == 0 || candidates.len() <= max {
        return candidates.to_vec();
    }
    let stride = candidates.len().div_ceil(max);
    candidates.iter().step_by(stride).cloned().collect()
}

fn compare_one(
    key: &RecordingKey,
    relative: &Utf8Path,
    original: &Recording,
    converted: &[(String, Recording)],
) -> Option<FileComparison> {
    // Channel alignment by label, in the original's order.
    let common: Vec<String> = original
        .channels
        .iter()
        .map(|ch| ch.label.clone())
        .filter(|label| {
            converted
                .iter()
                .all(|(_, recording)| recording.channel(label).is_some())
        })
        .collect();
    if common.is_empty() {
        return None;
    }

    let mut samples = original.n_samples();
    for (_, recording) in converted {
        samples = samples.min(recording.n_samples());
    }
    let truncated = original.n_samples() != samples
        || converted
            .iter()
            .any(|(_, recording)| recording.n_samples() != samples);
    if truncated {
        warn!(path = %relative, samples, "sample counts differ, truncating to shortest");
    }

    let formats = converted
        .iter()
        .map(|(format, recording)| {
            let mut channels = Vec::with_capacity(common.len());
            let mut correlations = Vec::new();
            let mut sum_sq = 0.0;
            for label in &common {
                let a = &original.channel(label).expect("common channel").data[..samples];
                let b = &recording.channel(label).expect("common channel").data[..samples];
                let correlation = pearson(a, b);
                let rms = rms_error(a, b);
                sum_sq += rms * rms;
                if correlation.is_finite() {
                    correlations.push(correlation);
                }
                channels.push(ChannelMetrics {
                    label: label.clone(),
                    // Degenerate (flat) channels have no defined correlation.
                    correlation: if correlation.is_finite() {
                        correlation
                    } else {
                        0.0
                    },
                    rms_error: rms,
                });
            }
            FormatMetrics {
                format: format.clone(),
                mean_correlation: mean(&correlations),
                rms_error: (sum_sq / common.len() as f64).sqrt(),
                channels,
            }
        })
        .collect();

    Some(FileComparison {
        key: key.stem(),
        relative_path: relative.to_string(),
        common_channels: common.len(),
        samples_compared: samples,
        truncated,
        formats,
    })
}

/// Pearson correlation coefficient; NaN when either side is flat.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return f64::NAN;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    cov / (var_a * var_b).sqrt()
}

/// Root-mean-square difference over the overlapping prefix.
pub fn rms_error(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let sum_sq: f64 = (0..n).map(|i| (a[i] - b[i]).powi(2)).sum();
    (sum_sq / n as f64).sqrt()
}
