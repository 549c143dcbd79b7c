use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::RecordingFormat;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("dataset directory does not exist: {0}")]
    MissingInputDir(Utf8PathBuf),

    #[error("no {1} recordings found under {0}")]
    NoRecordings(Utf8PathBuf, RecordingFormat),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid recording filename: {0}")]
    InvalidRecordingName(String),

    #[error("unknown recording format: {0}")]
    UnknownFormat(String),

    #[error("failed to read recording {path}: {reason}")]
    CodecRead { path: Utf8PathBuf, reason: String },

    #[error("failed to write recording {path}: {reason}")]
    CodecWrite { path: Utf8PathBuf, reason: String },

    #[error("writing {0} recordings is not supported")]
    UnsupportedWrite(RecordingFormat),

    #[error("malformed sidecar {path}: {reason}")]
    MalformedSidecar { path: Utf8PathBuf, reason: String },

    #[error("malformed events table {path}: {reason}")]
    MalformedTable { path: Utf8PathBuf, reason: String },

    #[error("invalid recording data: {0}")]
    InvalidRecording(String),

    #[error("external toolbox failure: {0}")]
    Toolbox(String),

    #[error("failed to render plot {path}: {reason}")]
    Plot { path: Utf8PathBuf, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
