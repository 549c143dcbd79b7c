mod common;

use approx::assert_abs_diff_eq;
use assert_matches::assert_matches;

use eeg_bids_pipeline::codec::set::SetCodec;
use eeg_bids_pipeline::codec::RecordingCodec;
use eeg_bids_pipeline::error::PipelineError;

use common::{utf8, SetFixture};

#[test]
fn reads_inline_container() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8(temp.path()).join("sub-01_task-rest_eeg.set");
    let fixture = SetFixture::sine(4, 2500, 500.0)
        .with_event("start", 1.0, 0.0)
        .with_event("stim", 1200.5, 25.0);
    fixture.write(&path);

    let recording = SetCodec.read(&path).unwrap();
    assert_eq!(recording.n_channels(), 4);
    assert_eq!(recording.n_samples(), 2500);
    assert_abs_diff_eq!(recording.sample_rate, 500.0, epsilon = 1e-12);
    let labels: Vec<&str> = recording
        .channels
        .iter()
        .map(|ch| ch.label.as_str())
        .collect();
    assert_eq!(labels, vec!["E1", "E2", "E3", "E4"]);
    for (ch, channel) in recording.channels.iter().enumerate() {
        for (t, &value) in channel.data.iter().enumerate() {
            assert_abs_diff_eq!(value, fixture.data[ch][t], epsilon = 1e-12);
        }
    }
    assert_eq!(recording.events.len(), 2);
    assert_eq!(recording.events[1].label, "stim");
    assert_abs_diff_eq!(recording.events[1].latency, 1200.5, epsilon = 1e-12);
    assert_abs_diff_eq!(recording.events[1].duration, 25.0, epsilon = 1e-12);
}

#[test]
fn reads_companion_fdt_waveform() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8(temp.path()).join("sub-02_task-rest_eeg.set");
    let mut fixture = SetFixture::sine(3, 1000, 250.0);
    fixture.companion_fdt = true;
    fixture.write(&path);

    let recording = SetCodec.read(&path).unwrap();
    assert_eq!(recording.n_channels(), 3);
    assert_eq!(recording.n_samples(), 1000);
    // Companion files hold f32, so compare at single precision.
    for (ch, channel) in recording.channels.iter().enumerate() {
        for (t, &value) in channel.data.iter().enumerate() {
            assert_abs_diff_eq!(value, fixture.data[ch][t], epsilon = 1e-4);
        }
    }
}

#[test]
fn reads_compressed_container() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8(temp.path()).join("sub-03_task-rest_eeg.set");
    let mut fixture = SetFixture::sine(2, 500, 100.0).with_event("go", 250.0, 0.0);
    fixture.compressed = true;
    fixture.write(&path);

    let recording = SetCodec.read(&path).unwrap();
    assert_eq!(recording.n_channels(), 2);
    assert_eq!(recording.n_samples(), 500);
    assert_eq!(recording.events.len(), 1);
}

#[test]
fn out_of_range_events_are_dropped_on_load() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8(temp.path()).join("sub-04_task-rest_eeg.set");
    SetFixture::sine(2, 1000, 500.0)
        .with_event("ok", 500.0, 0.0)
        .with_event("late", 6000.0, 0.0)
        .with_event("early", 0.0, 0.0)
        .write(&path);

    let recording = SetCodec.read(&path).unwrap();
    let labels: Vec<&str> = recording.events.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["ok"]);
}

#[test]
fn probe_works_without_the_waveform() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8(temp.path()).join("sub-05_task-rest_eeg.set");
    let mut fixture = SetFixture::sine(6, 1500, 300.0);
    fixture.companion_fdt = true;
    fixture.write(&path);
    // Lose the companion file; header-level metadata must still be
    // reachable while a full read fails.
    std::fs::remove_file(
        utf8(temp.path())
            .join("sub-05_task-rest_eeg.fdt")
            .as_std_path(),
    )
    .unwrap();

    let info = SetCodec.probe(&path).unwrap();
    assert_eq!(info.n_channels, 6);
    assert_eq!(info.n_samples, 1500);
    assert_abs_diff_eq!(info.sample_rate, 300.0, epsilon = 1e-12);

    let err = SetCodec.read(&path).unwrap_err();
    assert_matches!(err, PipelineError::CodecRead { .. });
}
