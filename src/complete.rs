use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, SecondsFormat};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::RecordingFormat;
use crate::error::PipelineError;
use crate::report::{FileOutcome, StageReport};
use crate::tree::{copy_file, write_bytes_atomic, DatasetTree};

/// Dataset-level files every valid output tree must carry.
const ROOT_FILES: [&str; 4] = [
    "dataset_description.json",
    "participants.json",
    "participants.tsv",
    "README",
];

/// Subtrees copied wholesale when the source dataset ships them.
const SUPPORT_DIRS: [&str; 2] = ["code", "derivatives"];

/// Fill the gaps the converter leaves behind: dataset-level metadata,
/// task-level configs, support directories and per-subject sidecars.
///
/// Every file is copied only if absent and never overwritten, so per-run
/// customizations already written into the output survive and a second run
/// is a no-op.
pub fn run_complete(
    input_root: &Utf8Path,
    output_root: &Utf8Path,
    format: RecordingFormat,
) -> Result<StageReport, PipelineError> {
    let input = DatasetTree::open(input_root)?;
    let output = DatasetTree::open(output_root)?;
    let mut report = StageReport::start("complete", input.root(), output.root());

    for name in ROOT_FILES {
        let source = input.join(Utf8Path::new(name));
        if !source.as_std_path().exists() {
            continue;
        }
        let dest = output.join(Utf8Path::new(name));
        let outcome = if name == "dataset_description.json" {
            complete_description(&source, &dest, format)
        } else {
            copy_if_absent(&source, &dest, Utf8Path::new(name))
        };
        report.record(outcome);
    }

    for source in task_level_configs(&input)? {
        let relative = input.relative_to(&source).to_owned();
        let dest = output.join(&relative);
        report.record(copy_if_absent(&source, &dest, &relative));
    }

    for dir in SUPPORT_DIRS {
        let source_dir = input.join(Utf8Path::new(dir));
        if !source_dir.as_std_path().is_dir() {
            continue;
        }
        let subtree = DatasetTree::open(&source_dir)?;
        for source in subtree.walk()? {
            let relative = input.relative_to(&source).to_owned();
            let dest = output.join(&relative);
            report.record(copy_if_absent(&source, &dest, &relative));
        }
    }

    for (source, relative) in subject_sidecars(&input, &output)? {
        let dest = output.join(&relative);
        report.record(copy_if_absent(&source, &dest, &relative));
    }

    report.finish();
    info!(
        copied = report.count("copied"),
        annotated = report.count("annotated"),
        already_present = report.count("already-present"),
        "structure completion finished"
    );
    Ok(report)
}

fn copy_if_absent(source: &Utf8Path, dest: &Utf8Path, relative: &Utf8Path) -> FileOutcome {
    if dest.as_std_path().exists() {
        return FileOutcome::new(relative, "already-present");
    }
    match copy_file(source, dest) {
        Ok(()) => {
            info!(path = %relative, "copied");
            FileOutcome::new(relative, "copied")
        }
        Err(err) => FileOutcome::with_reason(relative, "failed", err.to_string()),
    }
}

/// Copy the dataset description only when the output lacks one, annotating
/// the copy so the converted format is visible at dataset level. A
/// description already in place is never touched.
fn complete_description(
    source: &Utf8Path,
    dest: &Utf8Path,
    format: RecordingFormat,
) -> FileOutcome {
    let relative = Utf8Path::new("dataset_description.json");
    if dest.as_std_path().exists() {
        return FileOutcome::new(relative, "already-present");
    }
    match annotate_description(source, dest, format) {
        Ok(()) => {
            info!(path = %relative, format = format.label(), "description annotated");
            FileOutcome::new(relative, "annotated")
        }
        Err(err) => {
            warn!(path = %relative, %err, "description copied unannotated");
            match copy_file(source, dest) {
                Ok(()) => FileOutcome::with_reason(
                    relative,
                    "warning",
                    format!("copied unannotated: {err}"),
                ),
                Err(copy_err) => {
                    FileOutcome::with_reason(relative, "failed", copy_err.to_string())
                }
            }
        }
    }
}

fn annotate_description(
    source: &Utf8Path,
    dest: &Utf8Path,
    format: RecordingFormat,
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

    let name = object
        .get("Name")
        .and_then(Value::as_str)
        .unwrap_or("EEG Dataset")
        .to_string();
    object.insert(
        "Name".to_string(),
        Value::from(format!("{name} ({} Converted)", format.label())),
    );
    object.insert(
        "ConversionInfo".to_string(),
        serde_json::json!({
            "OriginalFormat": RecordingFormat::Set.label(),
            "ConvertedFormat": format.label(),
            "ConversionDate": Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "ConversionTool": env!("CARGO_PKG_NAME"),
        }),
    );

    let mut rendered = serde_json::to_vec_pretty(&value)
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    rendered.push(b'\n');
    write_bytes_atomic(dest, &rendered)
}

/// `task-*_eeg.json` and `task-*_events.json` at the dataset root.
fn task_level_configs(input: &DatasetTree) -> Result<Vec<Utf8PathBuf>, PipelineError> {
    let entries = fs::read_dir(input.root().as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {}: {err}", input.root())))?;
    let mut configs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|path| {
            PipelineError::Filesystem(format!("non-UTF8 path {}", path.display()))
        })?;
        let Some(name) = path.file_name() else {
            continue;
        };
        if path.as_std_path().is_file()
            && name.starts_with("task-")
            && (name.ends_with("_eeg.json") || name.ends_with("_events.json"))
        {
            configs.push(path);
        }
    }
    configs.sort();
    Ok(configs)
}

/// Sidecar TSV/JSON files for every subject present in the output tree,
/// taken from the matching subject directory of the input tree.
fn subject_sidecars(
    input: &DatasetTree,
    output: &DatasetTree,
) -> Result<Vec<(Utf8PathBuf, Utf8PathBuf)>, PipelineError> {
    let entries = fs::read_dir(output.root().as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {}: {err}", output.root())))?;
    let mut subjects = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|path| {
            PipelineError::Filesystem(format!("non-UTF8 path {}", path.display()))
        })?;
        if let Some(name) = path.file_name() {
            if path.as_std_path().is_dir() && name.starts_with("sub-") {
                subjects.push(name.to_string());
            }
        }
    }
    subjects.sort();

    let mut sidecars = Vec::new();
    for subject in subjects {
        let source_eeg = input.join(Utf8Path::new(&subject)).join("eeg");
        if !source_eeg.as_std_path().is_dir() {
            continue;
        }
        let subtree = DatasetTree::open(&source_eeg)?;
        for source in subtree.walk()? {
            let Some(name) = source.file_name() else {
                continue;
            };
            if name.ends_with("_events.tsv") || name.ends_with("_eeg.json") {
                let relative = input.relative_to(&source).to_owned();
                sidecars.push((source, relative));
            }
        }
    }
    Ok(sidecars)
}
