mod common;

use camino::Utf8PathBuf;

use eeg_bids_pipeline::codec::edf::EdfCodec;
use eeg_bids_pipeline::codec::RecordingCodec;
use eeg_bids_pipeline::compare::run_compare;
use eeg_bids_pipeline::config::PipelineConfig;
use eeg_bids_pipeline::convert::run_convert;
use eeg_bids_pipeline::domain::RecordingFormat;
use eeg_bids_pipeline::recording::{Channel, Recording};

use common::{utf8, TreeFixture};

fn no_plot_config() -> PipelineConfig {
    PipelineConfig {
        plots: false,
        ..PipelineConfig::default()
    }
}

#[test]
fn both_formats_track_the_original() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = TreeFixture::source_dataset(utf8(temp.path()).join("source"), 3);
    let edf_root = utf8(temp.path()).join("edf");
    let bdf_root = utf8(temp.path()).join("bdf");
    let config = no_plot_config();
    run_convert(&config, &fixture.root, &edf_root, RecordingFormat::Edf).unwrap();
    run_convert(&config, &fixture.root, &bdf_root, RecordingFormat::Bdf).unwrap();

    let out_dir = utf8(temp.path()).join("comparison");
    let report = run_compare(
        &config,
        &fixture.root,
        &[edf_root, bdf_root],
        &out_dir,
    )
    .unwrap();

    assert_eq!(report.files.len(), 3);
    assert!(report.skipped.is_empty());
    for file in &report.files {
        assert_eq!(file.common_channels, 4);
        assert_eq!(file.samples_compared, 5000);
        assert!(!file.truncated);
    }

    let edf = report.aggregates.iter().find(|a| a.format == "edf").unwrap();
    let bdf = report.aggregates.iter().find(|a| a.format == "bdf").unwrap();
    assert!(edf.mean_correlation > 0.999, "edf r = {}", edf.mean_correlation);
    assert!(bdf.mean_correlation > 0.999, "bdf r = {}", bdf.mean_correlation);
    // The 24-bit container quantizes more finely than the 16-bit one.
    assert!(
        bdf.mean_rms_error < edf.mean_rms_error,
        "bdf rms {} not below edf rms {}",
        bdf.mean_rms_error,
        edf.mean_rms_error
    );

    assert!(out_dir.join("comparison_results.json").as_std_path().exists());
}

#[test]
fn mismatched_lengths_truncate_and_are_recorded() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = TreeFixture::source_dataset(utf8(temp.path()).join("source"), 1);
    let edf_root = utf8(temp.path()).join("edf");

    // Hand-build a converted tree whose recording is shorter, as if it had
    // been resampled before conversion.
    let source = eeg_bids_pipeline::codec::set::SetCodec
        .read(&fixture.recording_path("01"))
        .unwrap();
    let truncated_channels: Vec<Channel> = source
        .channels
        .iter()
        .map(|ch| Channel {
            label: ch.label.clone(),
            unit: ch.unit.clone(),
            data: ch.data[..4000].to_vec(),
        })
        .collect();
    let truncated =
        Recording::new(truncated_channels, source.sample_rate, Vec::new()).unwrap();
    EdfCodec::edf()
        .write(
            &truncated,
            &edf_root.join("sub-01/eeg/sub-01_task-rest_eeg.edf"),
        )
        .unwrap();

    let out_dir = utf8(temp.path()).join("comparison");
    let report = run_compare(
        &no_plot_config(),
        &fixture.root,
        &[edf_root],
        &out_dir,
    )
    .unwrap();

    assert_eq!(report.files.len(), 1);
    assert!(report.files[0].truncated);
    assert_eq!(report.files[0].samples_compared, 4000);
    assert!(report.files[0].formats[0].mean_correlation > 0.999);
}

#[test]
fn selection_is_bounded_and_reproducible() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = TreeFixture::source_dataset(utf8(temp.path()).join("source"), 5);
    let edf_root = utf8(temp.path()).join("edf");
    let mut config = no_plot_config();
    run_convert(&config, &fixture.root, &edf_root, RecordingFormat::Edf).unwrap();
    config.max_compare_files = 2;

    let out_dir = utf8(temp.path()).join("comparison");
    let roots: [Utf8PathBuf; 1] = [edf_root];
    let first = run_compare(&config, &fixture.root, &roots, &out_dir).unwrap();
    let second = run_compare(&config, &fixture.root, &roots, &out_dir).unwrap();

    assert!(first.files.len() <= 2);
    let first_paths: Vec<&str> = first.files.iter().map(|f| f.relative_path.as_str()).collect();
    let second_paths: Vec<&str> = second.files.iter().map(|f| f.relative_path.as_str()).collect();
    assert_eq!(first_paths, second_paths);
}

#[test]
fn plots_are_rendered_when_enabled() {
    let temp = tempfile::tempdir().unwrap();
    let fixture = TreeFixture::source_dataset(utf8(temp.path()).join("source"), 1);
    let edf_root = utf8(temp.path()).join("edf");
    let mut config = no_plot_config();
    run_convert(&config, &fixture.root, &edf_root, RecordingFormat::Edf).unwrap();
    config.plots = true;

    let out_dir = utf8(temp.path()).join("comparison");
    run_compare(&config, &fixture.root, &[edf_root], &out_dir).unwrap();

    for name in [
        "signal_comparison.svg",
        "signal_differences.svg",
        "correlations.svg",
    ] {
        let path = out_dir.join("file_01").join(name);
        assert!(path.as_std_path().exists(), "missing {path}");
    }
}
