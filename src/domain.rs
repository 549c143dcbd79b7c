use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use camino::Utf8Path;
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Container format of a recording file.
///
/// `Set` is the MATLAB-toolbox-native source format; `Edf` and `Bdf` are the
/// fixed-point interchange formats (16-bit and 24-bit sample resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    Set,
    Edf,
    Bdf,
}

impl RecordingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFormat::Set => "set",
            RecordingFormat::Edf => "edf",
            RecordingFormat::Bdf => "bdf",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecordingFormat::Set => "SET",
            RecordingFormat::Edf => "EDF",
            RecordingFormat::Bdf => "BDF",
        }
    }

    /// Bit depth of one stored sample, where the format is fixed-point.
    pub fn bit_depth(&self) -> Option<u8> {
        match self {
            RecordingFormat::Set => None,
            RecordingFormat::Edf => Some(16),
            RecordingFormat::Bdf => Some(24),
        }
    }

    /// Full-scale digital range for fixed-point formats.
    pub fn digital_range(&self) -> Option<(i32, i32)> {
        match self {
            RecordingFormat::Set => None,
            RecordingFormat::Edf => Some((-32_768, 32_767)),
            RecordingFormat::Bdf => Some((-8_388_608, 8_388_607)),
        }
    }

    pub fn from_extension(ext: &str) -> Result<Self, PipelineError> {
        match ext.to_ascii_lowercase().as_str() {
            "set" => Ok(RecordingFormat::Set),
            "edf" => Ok(RecordingFormat::Edf),
            "bdf" => Ok(RecordingFormat::Bdf),
            other => Err(PipelineError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for RecordingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Interchange formats accepted as conversion targets on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetFormat {
    Edf,
    Bdf,
}

impl From<TargetFormat> for RecordingFormat {
    fn from(value: TargetFormat) -> Self {
        match value {
            TargetFormat::Edf => RecordingFormat::Edf,
            TargetFormat::Bdf => RecordingFormat::Bdf,
        }
    }
}

/// Identity of one acquisition: `sub-<id>[_ses-<s>]_task-<name>[_run-<n>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingKey {
    pub subject: String,
    pub session: Option<String>,
    pub task: String,
    pub run: Option<u32>,
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^sub-([A-Za-z0-9]+)(?:_ses-([A-Za-z0-9]+))?_task-([A-Za-z0-9]+)(?:_run-(\d+))?_eeg$",
        )
        .expect("recording key pattern")
    })
}

impl RecordingKey {
    /// Parse the key from a recording, sidecar or events file path.
    ///
    /// Accepts the `_eeg.<ext>` and `_events.tsv` suffix conventions; any
    /// other basename is rejected rather than guessed at.
    pub fn from_path(path: &Utf8Path) -> Result<Self, PipelineError> {
        let name = path
            .file_name()
            .ok_or_else(|| PipelineError::InvalidRecordingName(path.to_string()))?;
        let stem = name
            .split_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(name)
            .replace("_events", "_eeg");
        stem.parse()
    }

    /// Canonical basename stem, without suffix or extension.
    pub fn stem(&self) -> String {
        let mut stem = format!("sub-{}", self.subject);
        if let Some(session) = &self.session {
            stem.push_str(&format!("_ses-{session}"));
        }
        stem.push_str(&format!("_task-{}", self.task));
        if let Some(run) = self.run {
            stem.push_str(&format!("_run-{run:02}"));
        }
        stem
    }
}

impl fmt::Display for RecordingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stem())
    }
}

impl FromStr for RecordingKey {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = key_regex()
            .captures(value.trim())
            .ok_or_else(|| PipelineError::InvalidRecordingName(value.to_string()))?;
        let run = captures
            .get(4)
            .map(|m| m.as_str().parse::<u32>())
            .transpose()
            .map_err(|_| PipelineError::InvalidRecordingName(value.to_string()))?;
        Ok(Self {
            subject: captures[1].to_string(),
            session: captures.get(2).map(|m| m.as_str().to_string()),
            task: captures[3].to_string(),
            run,
        })
    }
}
