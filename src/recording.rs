use serde::Serialize;

use crate::error::PipelineError;

/// One channel of a recording: label, physical unit and the full waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub label: String,
    pub unit: String,
    pub data: Vec<f64>,
}

impl Channel {
    pub fn new(label: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            unit: "uV".to_string(),
            data,
        }
    }
}

/// A marker on the recording timeline. Latency is a 1-based sample index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub latency: f64,
    pub duration: f64,
    pub label: String,
}

/// One subject/task acquisition held in memory.
///
/// Channels are rectangular: every channel carries the same number of
/// samples. Inputs are read once and never mutated in place; transformations
/// produce a new `Recording`.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub channels: Vec<Channel>,
    pub sample_rate: f64,
    pub events: Vec<Event>,
}

impl Recording {
    pub fn new(
        channels: Vec<Channel>,
        sample_rate: f64,
        events: Vec<Event>,
    ) -> Result<Self, PipelineError> {
        if sample_rate <= 0.0 {
            return Err(PipelineError::InvalidRecording(format!(
                "non-positive sample rate {sample_rate}"
            )));
        }
        if let Some(first) = channels.first() {
            let n = first.data.len();
            if let Some(odd) = channels.iter().find(|ch| ch.data.len() != n) {
                return Err(PipelineError::InvalidRecording(format!(
                    "channel {} has {} samples, expected {n}",
                    odd.label,
                    odd.data.len()
                )));
            }
        }
        Ok(Self {
            channels,
            sample_rate,
            events,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn n_samples(&self) -> usize {
        self.channels.first().map(|ch| ch.data.len()).unwrap_or(0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.n_samples() as f64 / self.sample_rate
    }

    pub fn channel(&self, label: &str) -> Option<&Channel> {
        self.channels.iter().find(|ch| ch.label == label)
    }

    /// Drop events whose latency falls outside `[1, n_samples]`.
    ///
    /// Invalid events are dropped, not repaired. Returns how many were
    /// removed so callers can log the data-quality warning.
    pub fn retain_valid_events(&mut self) -> usize {
        let n_samples = self.n_samples() as f64;
        let before = self.events.len();
        self.events
            .retain(|event| event.latency >= 1.0 && event.latency <= n_samples);
        before - self.events.len()
    }
}

/// Header-level description of a recording, without the waveform payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingInfo {
    pub n_channels: usize,
    pub n_samples: usize,
    pub sample_rate: f64,
}
