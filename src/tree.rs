use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::RecordingFormat;
use crate::error::PipelineError;

/// One BIDS dataset root on disk.
///
/// All discovery is sorted so batch order (and therefore report order and
/// comparator selection) is deterministic across runs.
#[derive(Debug, Clone)]
pub struct DatasetTree {
    root: Utf8PathBuf,
}

impl DatasetTree {
    /// Open an existing dataset root; fails before any file is processed
    /// when the directory is missing.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        if !root.as_std_path().is_dir() {
            return Err(PipelineError::MissingInputDir(root));
        }
        Ok(Self { root })
    }

    /// A root that may not exist yet (output side); created on demand.
    pub fn create(root: impl Into<Utf8PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("create {root}: {err}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn join(&self, relative: &Utf8Path) -> Utf8PathBuf {
        self.root.join(relative)
    }

    pub fn relative_to<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Depth-first enumeration of every file under the root, sorted.
    pub fn walk(&self) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = fs::read_dir(dir.as_std_path())
                .map_err(|err| PipelineError::Filesystem(format!("read {dir}: {err}")))?;
            for entry in entries {
                let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
                let path = Utf8PathBuf::from_path_buf(entry.path())
                    .map_err(|path| {
                        PipelineError::Filesystem(format!("non-UTF8 path {}", path.display()))
                    })?;
                if path.as_std_path().is_dir() {
                    stack.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// All recordings of the given format, by the `_eeg.<ext>` suffix
    /// convention (a bare extension match would also pick up unrelated
    /// files elsewhere in the tree).
    pub fn scan_recordings(
        &self,
        format: RecordingFormat,
    ) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let suffix = format!("_eeg.{}", format.extension());
        Ok(self
            .walk()?
            .into_iter()
            .filter(|path| path.as_str().ends_with(&suffix))
            .collect())
    }

    /// Which interchange format this tree holds, judged by which recordings
    /// are actually present. `Set` wins only when no interchange files exist.
    pub fn detect_format(&self) -> Result<RecordingFormat, PipelineError> {
        for format in [
            RecordingFormat::Bdf,
            RecordingFormat::Edf,
            RecordingFormat::Set,
        ] {
            if !self.scan_recordings(format)?.is_empty() {
                return Ok(format);
            }
        }
        Err(PipelineError::NoRecordings(
            self.root.clone(),
            RecordingFormat::Set,
        ))
    }

    /// Mirror `path` (which lives under this tree) into `output`, swapping
    /// the recording extension for the target format's.
    pub fn mirror_recording_path(
        &self,
        path: &Utf8Path,
        output: &DatasetTree,
        target: RecordingFormat,
    ) -> Utf8PathBuf {
        let relative = self.relative_to(path);
        let mirrored = output.join(relative);
        mirrored.with_extension(target.extension())
    }
}

pub fn copy_file(source: &Utf8Path, dest: &Utf8Path) -> Result<(), PipelineError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("create {parent}: {err}")))?;
    }
    fs::copy(source.as_std_path(), dest.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("copy {source} -> {dest}: {err}")))?;
    Ok(())
}

/// Write through a sibling temp file and rename, so an interrupted run never
/// leaves a half-written file that the resume-by-skip policy would treat as
/// complete output.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::Filesystem(format!("no parent for {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("create {parent}: {err}")))?;
    let temp = Builder::new()
        .prefix(".eeg-bids")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content)
        .map_err(|err| PipelineError::Filesystem(format!("write {path}: {err}")))?;
    if path.as_std_path().exists() {
        fs::remove_file(path.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_json_atomic<T: serde::Serialize>(
    path: &Utf8Path,
    value: &T,
) -> Result<(), PipelineError> {
    let mut content = serde_json::to_vec_pretty(value)
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    content.push(b'\n');
    write_bytes_atomic(path, &content)
}
