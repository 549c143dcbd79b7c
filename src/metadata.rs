use std::fs;

use camino::Utf8Path;
use serde_json::Value;
use tracing::{info, warn};

use crate::codec::{self, RecordingCodec};
use crate::domain::RecordingFormat;
use crate::error::PipelineError;
use crate::recording::RecordingInfo;
use crate::report::{FileOutcome, StageReport};
use crate::tree::{copy_file, write_bytes_atomic, DatasetTree};

/// Mirror a dataset tree while the external toolbox resamples the
/// recordings: sampling-rate sidecar fields are rewritten to the target
/// rate, events tables lose their now-stale `sample` column, and every
/// other file is copied byte-for-byte. Recording payloads (`_eeg.set` and
/// `.fdt` companions) are left to the toolbox.
pub fn run_rewrite(
    input_root: &Utf8Path,
    output_root: &Utf8Path,
    target_rate: f64,
) -> Result<StageReport, PipelineError> {
    let input = DatasetTree::open(input_root)?;
    let output = DatasetTree::create(output_root)?;
    let mut report = StageReport::start("rewrite-metadata", input.root(), output.root());
    let probe_codec = codec::for_format(RecordingFormat::Set);

    for source in input.walk()? {
        let relative = input.relative_to(&source).to_owned();
        let dest = output.join(&relative);
        let name = source.file_name().unwrap_or_default();

        let outcome = if name.ends_with("_eeg.json") {
            rewrite_sidecar(&source, &dest, &relative, target_rate)
        } else if name.ends_with("_events.tsv") {
            let probe = sibling_probe(probe_codec.as_ref(), &source);
            rewrite_events(&source, &dest, &relative, probe)
        } else if name.ends_with("_eeg.set") || source.extension() == Some("fdt") {
            info!(path = %relative, "recording payload left to the resampling toolbox");
            FileOutcome::new(&relative, "skipped")
        } else {
            match copy_file(&source, &dest) {
                Ok(()) => FileOutcome::new(&relative, "copied"),
                Err(err) => FileOutcome::with_reason(&relative, "failed", err.to_string()),
            }
        };
        report.record(outcome);
    }

    report.finish();
    info!(
        rewritten = report.count("rewritten"),
        copied = report.count("copied"),
        failed = report.failed(),
        "metadata pass finished"
    );
    Ok(report)
}

/// Copy a recording sidecar with `SamplingFrequency` forced to the target
/// rate; every other field passes through untouched. The field is inserted
/// when the source sidecar lacks it.
pub fn patch_sidecar(
    source: &Utf8Path,
    dest: &Utf8Path,
    target_rate: f64,
) -> Result<(), PipelineError> {
    let content = fs::read_to_string(source.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {source}: {err}")))?;
    let mut value: Value =
        serde_json::from_str(&content).map_err(|err| PipelineError::MalformedSidecar {
            path: source.to_owned(),
            reason: err.to_string(),
        })?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| PipelineError::MalformedSidecar {
            path: source.to_owned(),
            reason: "top level is not a JSON object".to_string(),
        })?;

    let old = object.insert("SamplingFrequency".to_string(), rate_value(target_rate));
    match old {
        Some(old) => info!(path = %source, %old, new = target_rate, "sampling frequency rewritten"),
        None => info!(path = %source, new = target_rate, "sampling frequency added"),
    }

    let mut rendered = serde_json::to_vec_pretty(&value)
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    rendered.push(b'\n');
    write_bytes_atomic(dest, &rendered)
}

/// `100` stays an integer in the output JSON rather than becoming `100.0`.
fn rate_value(rate: f64) -> Value {
    if rate.fract() == 0.0 {
        Value::from(rate as i64)
    } else {
        Value::from(rate)
    }
}

fn rewrite_sidecar(
    source: &Utf8Path,
    dest: &Utf8Path,
    relative: &Utf8Path,
    target_rate: f64,
) -> FileOutcome {
    match patch_sidecar(source, dest, target_rate) {
        Ok(()) => FileOutcome::new(relative, "rewritten"),
        Err(err) => {
            // Malformed sidecars travel unchanged; dropping them would
            // leave the output tree missing files the input tree has.
            warn!(path = %relative, %err, "sidecar copied unchanged");
            match copy_file(source, dest) {
                Ok(()) => {
                    FileOutcome::with_reason(relative, "warning", format!("copied unchanged: {err}"))
                }
                Err(copy_err) => {
                    FileOutcome::with_reason(relative, "failed", copy_err.to_string())
                }
            }
        }
    }
}

/// Header-probe the recording that owns this events table, for onset
/// validation. `None` when the sibling is absent or unreadable.
fn sibling_probe(probe_codec: &dyn RecordingCodec, events_path: &Utf8Path) -> Option<RecordingInfo> {
    let name = events_path.file_name()?;
    let sibling_name = name.replace("_events.tsv", "_eeg.set");
    let sibling = events_path.parent()?.join(sibling_name);
    if !sibling.as_std_path().exists() {
        return None;
    }
    match probe_codec.probe(&sibling) {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(path = %sibling, %err, "cannot probe recording, keeping all event rows");
            None
        }
    }
}

fn rewrite_events(
    source: &Utf8Path,
    dest: &Utf8Path,
    relative: &Utf8Path,
    probe: Option<RecordingInfo>,
) -> FileOutcome {
    match rewrite_events_table(source, dest, probe) {
        Ok(dropped) => {
            if dropped > 0 {
                warn!(path = %relative, dropped, "dropped events beyond the recording end");
            }
            FileOutcome::new(relative, "rewritten")
        }
        Err(err) => {
            warn!(path = %relative, %err, "events table copied unchanged");
            match copy_file(source, dest) {
                Ok(()) => {
                    FileOutcome::with_reason(relative, "warning", format!("copied unchanged: {err}"))
                }
                Err(copy_err) => {
                    FileOutcome::with_reason(relative, "failed", copy_err.to_string())
                }
            }
        }
    }
}

/// Rewrite one events table: drop the `sample` column, keep row order,
/// normalize empty cells to `n/a` everywhere except `onset`, and drop rows
/// whose onset lies beyond the end of the recording. Returns the number of
/// dropped rows.
fn rewrite_events_table(
    source: &Utf8Path,
    dest: &Utf8Path,
    probe: Option<RecordingInfo>,
) -> Result<usize, PipelineError> {
    let content = fs::read_to_string(source.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {source}: {err}")))?;
    let mut lines = content.lines();
    let header_line = lines.next().ok_or_else(|| PipelineError::MalformedTable {
        path: source.to_owned(),
        reason: "empty file".to_string(),
    })?;

    let header: Vec<&str> = header_line.split('\t').collect();
    let sample_idx = header.iter().position(|&col| col == "sample");
    let onset_idx = header.iter().position(|&col| col == "onset");

    let mut out = String::new();
    push_row(
        &mut out,
        header.iter().map(|col| col.to_string()).collect(),
        sample_idx,
    );

    let mut dropped = 0usize;
    for line in lines {
        let mut fields: Vec<String> = line.split('\t').map(|f| f.to_string()).collect();
        if fields.len() > header.len() {
            return Err(PipelineError::MalformedTable {
                path: source.to_owned(),
                reason: format!(
                    "row has {} fields, header has {}",
                    fields.len(),
                    header.len()
                ),
            });
        }
        fields.resize(header.len(), String::new());

        if let (Some(onset_idx), Some(info)) = (onset_idx, probe) {
            if let Ok(onset) = fields[onset_idx].trim().parse::<f64>() {
                let latency = onset * info.sample_rate;
                if latency < -1e-9 || latency > (info.n_samples.saturating_sub(1)) as f64 + 1e-9 {
                    dropped += 1;
                    continue;
                }
            }
        }

        for (idx, field) in fields.iter_mut().enumerate() {
            if Some(idx) != onset_idx && field.trim().is_empty() {
                *field = "n/a".to_string();
            }
        }
        push_row(&mut out, fields, sample_idx);
    }

    write_bytes_atomic(dest, out.as_bytes())?;
    Ok(dropped)
}

fn push_row(out: &mut String, mut fields: Vec<String>, sample_idx: Option<usize>) {
    if let Some(idx) = sample_idx {
        if idx < fields.len() {
            fields.remove(idx);
        }
    }
    out.push_str(&fields.join("\t"));
    out.push('\n');
}
