mod common;

use std::fs;

use approx::assert_abs_diff_eq;
use serde_json::Value;

use eeg_bids_pipeline::app::run_resample;
use eeg_bids_pipeline::codec::edf::EdfCodec;
use eeg_bids_pipeline::codec::RecordingCodec;
use eeg_bids_pipeline::domain::RecordingFormat;
use eeg_bids_pipeline::error::PipelineError;
use eeg_bids_pipeline::recording::{Channel, Event, Recording};
use eeg_bids_pipeline::toolbox::SignalToolbox;

use common::{utf8, TreeFixture};

/// Stand-in for the external engine: plain decimation by an integer
/// factor, with event latencies rescaled the way the engine would.
struct DecimatingToolbox;

impl SignalToolbox for DecimatingToolbox {
    fn filter_resample(
        &self,
        recording: &Recording,
        _band: (f64, f64),
        target_rate: f64,
    ) -> Result<Recording, PipelineError> {
        let factor = (recording.sample_rate / target_rate).round() as usize;
        if factor == 0 || (recording.sample_rate / target_rate).fract().abs() > 1e-9 {
            return Err(PipelineError::Toolbox(format!(
                "non-integer decimation {} -> {target_rate}",
                recording.sample_rate
            )));
        }
        let ratio = target_rate / recording.sample_rate;
        let channels = recording
            .channels
            .iter()
            .map(|ch| Channel {
                label: ch.label.clone(),
                unit: ch.unit.clone(),
                data: ch.data.iter().step_by(factor).copied().collect(),
            })
            .collect();
        let events = recording
            .events
            .iter()
            .map(|event| Event {
                latency: (event.latency - 1.0) * ratio + 1.0,
                duration: event.duration * ratio,
                label: event.label.clone(),
            })
            .collect();
        Recording::new(channels, target_rate, events)
    }

    fn name(&self) -> &str {
        "decimating-mock"
    }
}

#[test]
fn resamples_the_tree_and_rewrites_metadata() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = TreeFixture::source_dataset(utf8(temp.path()).join("source"), 3);
    let output = utf8(temp.path()).join("resampled");

    let outcome = run_resample(
        &DecimatingToolbox,
        &fixture.root,
        &output,
        RecordingFormat::Bdf,
        (0.5, 45.0),
        100.0,
    )
    .unwrap();

    assert_eq!(outcome.recordings.count("resampled"), 3);
    assert_eq!(outcome.recordings.failed(), 0);
    assert_eq!(outcome.metadata.failed(), 0);

    // Exactly three output recordings, each 1000 samples at 100 Hz.
    let codec = EdfCodec::bdf();
    for subject in &fixture.subjects {
        let path = output.join(format!(
            "sub-{subject}/eeg/sub-{subject}_task-rest_eeg.bdf"
        ));
        let info = codec.probe(&path).unwrap();
        assert_eq!(info.n_channels, 4);
        assert_eq!(info.n_samples, 1000);
        assert_abs_diff_eq!(info.sample_rate, 100.0, epsilon = 1e-9);
    }

    // Sidecars carry the new rate.
    let sidecar: Value = serde_json::from_str(
        &fs::read_to_string(
            output
                .join("sub-01/eeg/sub-01_task-rest_eeg.json")
                .as_std_path(),
        )
        .unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["SamplingFrequency"], Value::from(100));

    // The out-of-range event vanished from the events table, along with
    // the sample column.
    let events = fs::read_to_string(
        output
            .join("sub-01/eeg/sub-01_task-rest_events.tsv")
            .as_std_path(),
    )
    .unwrap();
    assert!(!events.contains("late"));
    assert!(!events.contains("sample"));
    assert!(events.contains("stim"));
}

#[test]
fn second_run_skips_resampled_recordings() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = TreeFixture::source_dataset(utf8(temp.path()).join("source"), 2);
    let output = utf8(temp.path()).join("resampled");

    run_resample(
        &DecimatingToolbox,
        &fixture.root,
        &output,
        RecordingFormat::Bdf,
        (0.5, 45.0),
        100.0,
    )
    .unwrap();
    let outcome = run_resample(
        &DecimatingToolbox,
        &fixture.root,
        &output,
        RecordingFormat::Bdf,
        (0.5, 45.0),
        100.0,
    )
    .unwrap();

    assert_eq!(outcome.recordings.count("skipped"), 2);
    assert_eq!(outcome.recordings.count("resampled"), 0);
}

#[test]
fn toolbox_failure_is_recorded_per_file() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = TreeFixture::source_dataset(utf8(temp.path()).join("source"), 2);
    let output = utf8(temp.path()).join("resampled");

    // 500 -> 300 Hz is not an integer decimation, so every file fails in
    // the mock engine; the batch itself must still complete.
    let outcome = run_resample(
        &DecimatingToolbox,
        &fixture.root,
        &output,
        RecordingFormat::Bdf,
        (0.5, 45.0),
        300.0,
    )
    .unwrap();

    assert_eq!(outcome.recordings.failed(), 2);
    assert_eq!(outcome.metadata.failed(), 0);
}
