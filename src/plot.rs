//! SVG artifacts for the signal comparator: waveform overlays, difference
//! traces and a correlation heatmap per compared recording.

use std::fs;

use camino::Utf8Path;
use plotters::prelude::*;

use crate::error::PipelineError;
use crate::recording::Recording;
use crate::report::FileComparison;

/// Channels drawn in the overlay and difference figures.
const PLOT_CHANNELS: usize = 4;
/// Window drawn from the start of the recording, in seconds.
const PLOT_SECONDS: f64 = 10.0;

const SERIES_COLORS: [&RGBColor; 4] = [&BLACK, &BLUE, &RED, &GREEN];

pub fn render_file_plots(
    dir: &Utf8Path,
    comparison: &FileComparison,
    original: &Recording,
    converted: &[(String, Recording)],
) -> Result<(), PipelineError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| plot_error(dir, format!("create dir: {err}")))?;

    let labels: Vec<&str> = comparison
        .formats
        .first()
        .map(|metrics| {
            metrics
                .channels
                .iter()
                .take(PLOT_CHANNELS)
                .map(|ch| ch.label.as_str())
                .collect()
        })
        .unwrap_or_default();
    if labels.is_empty() || comparison.samples_compared < 2 {
        return Ok(());
    }
    let window = (PLOT_SECONDS * original.sample_rate) as usize;
    let samples = comparison.samples_compared.min(window.max(2));

    overlay_plot(
        &dir.join("signal_comparison.svg"),
        &labels,
        samples,
        original,
        converted,
    )?;
    difference_plot(
        &dir.join("signal_differences.svg"),
        &labels,
        samples,
        original,
        converted,
    )?;
    correlation_heatmap(&dir.join("correlations.svg"), comparison)
}

fn overlay_plot(
    path: &Utf8Path,
    labels: &[&str],
    samples: usize,
    original: &Recording,
    converted: &[(String, Recording)],
) -> Result<(), PipelineError> {
    let root = SVGBackend::new(path.as_std_path(), (1200, 280 * labels.len() as u32))
        .into_drawing_area();
    root.fill(&WHITE).map_err(|err| plot_error(path, err))?;
    let panels = root.split_evenly((labels.len(), 1));

    for (panel, label) in panels.iter().zip(labels) {
        let series: Vec<(String, &[f64])> = std::iter::once((
            "original".to_string(),
            &original.channel(label).expect("plotted channel").data[..samples],
        ))
        .chain(converted.iter().map(|(format, recording)| {
            (
                format.clone(),
                &recording.channel(label).expect("plotted channel").data[..samples],
            )
        }))
        .collect();

        let (y_min, y_max) = value_range(series.iter().map(|(_, data)| *data));
        let t_max = samples as f64 / original.sample_rate;

        let mut chart = ChartBuilder::on(panel)
            .caption(format!("Channel {label}"), ("sans-serif", 18))
            .margin(8)
            .x_label_area_size(28)
            .y_label_area_size(56)
            .build_cartesian_2d(0.0..t_max, y_min..y_max)
            .map_err(|err| plot_error(path, err))?;
        chart
            .configure_mesh()
            .x_desc("Time (s)")
            .y_desc("Amplitude (uV)")
            .draw()
            .map_err(|err| plot_error(path, err))?;

        for (index, (name, data)) in series.iter().enumerate() {
            let color = SERIES_COLORS[index % SERIES_COLORS.len()];
            let rate = original.sample_rate;
            chart
                .draw_series(LineSeries::new(
                    data.iter()
                        .enumerate()
                        .map(|(i, &v)| (i as f64 / rate, v)),
                    color,
                ))
                .map_err(|err| plot_error(path, err))?
                .label(name.clone())
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 16, y)], color)
                });
        }
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(|err| plot_error(path, err))?;
    }

    root.present().map_err(|err| plot_error(path, err))
}

fn difference_plot(
    path: &Utf8Path,
    labels: &[&str],
    samples: usize,
    original: &Recording,
    converted: &[(String, Recording)],
) -> Result<(), PipelineError> {
    let root = SVGBackend::new(path.as_std_path(), (1200, 280 * labels.len() as u32))
        .into_drawing_area();
    root.fill(&WHITE).map_err(|err| plot_error(path, err))?;
    let panels = root.split_evenly((labels.len(), 1));

    for (panel, label) in panels.iter().zip(labels) {
        let reference = &original.channel(label).expect("plotted channel").data[..samples];
        let diffs: Vec<(String, Vec<f64>)> = converted
            .iter()
            .map(|(format, recording)| {
                let data = &recording.channel(label).expect("plotted channel").data[..samples];
                (
                    format.clone(),
                    reference.iter().zip(data).map(|(a, b)| a - b).collect(),
                )
            })
            .collect();

        let (y_min, y_max) = value_range(diffs.iter().map(|(_, data)| data.as_slice()));
        let t_max = samples as f64 / original.sample_rate;

        let mut chart = ChartBuilder::on(panel)
            .caption(
                format!("Channel {label}: original minus converted"),
                ("sans-serif", 18),
            )
            .margin(8)
            .x_label_area_size(28)
            .y_label_area_size(56)
            .build_cartesian_2d(0.0..t_max, y_min..y_max)
            .map_err(|err| plot_error(path, err))?;
        chart
            .configure_mesh()
            .x_desc("Time (s)")
            .y_desc("Difference (uV)")
            .draw()
            .map_err(|err| plot_error(path, err))?;

        for (index, (name, data)) in diffs.iter().enumerate() {
            let color = SERIES_COLORS[(index + 1) % SERIES_COLORS.len()];
            let rate = original.sample_rate;
            chart
                .draw_series(LineSeries::new(
                    data.iter()
                        .enumerate()
                        .map(|(i, &v)| (i as f64 / rate, v)),
                    color,
                ))
                .map_err(|err| plot_error(path, err))?
                .label(name.clone())
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 16, y)], color)
                });
        }
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(|err| plot_error(path, err))?;
    }

    root.present().map_err(|err| plot_error(path, err))
}

fn correlation_heatmap(
    path: &Utf8Path,
    comparison: &FileComparison,
) -> Result<(), PipelineError> {
    let n_formats = comparison.formats.len();
    let n_channels = comparison.common_channels;
    if n_formats == 0 || n_channels == 0 {
        return Ok(());
    }

    let root = SVGBackend::new(path.as_std_path(), (1200, 160 + 60 * n_formats as u32))
        .into_drawing_area();
    root.fill(&WHITE).map_err(|err| plot_error(path, err))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Per-channel correlation", ("sans-serif", 18))
        .margin(8)
        .x_label_area_size(28)
        .y_label_area_size(56)
        .build_cartesian_2d(0.0..n_channels as f64, 0.0..n_formats as f64)
        .map_err(|err| plot_error(path, err))?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Channel index")
        .y_labels(n_formats)
        .y_label_formatter(&|y| {
            comparison
                .formats
                .get(*y as usize)
                .map(|metrics| metrics.format.clone())
                .unwrap_or_default()
        })
        .draw()
        .map_err(|err| plot_error(path, err))?;

    for (row, metrics) in comparison.formats.iter().enumerate() {
        chart
            .draw_series(metrics.channels.iter().enumerate().map(|(col, channel)| {
                let t = channel.correlation.clamp(0.0, 1.0);
                let color = RGBColor(
                    (255.0 * t) as u8,
                    (96.0 * t) as u8,
                    (255.0 * (1.0 - t)) as u8,
                );
                Rectangle::new(
                    [
                        (col as f64, row as f64),
                        (col as f64 + 1.0, row as f64 + 1.0),
                    ],
                    color.filled(),
                )
            }))
            .map_err(|err| plot_error(path, err))?;
    }

    root.present().map_err(|err| plot_error(path, err))
}

fn value_range<'a>(series: impl Iterator<Item = &'a [f64]>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for data in series {
        for &value in data {
            min = min.min(value);
            max = max.max(value);
        }
    }
    if !(min.is_finite() && max.is_finite()) || max - min < f64::EPSILON {
        return (min.min(0.0) - 1.0, max.max(0.0) + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

fn plot_error(path: &Utf8Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Plot {
        path: path.to_owned(),
        reason: err.to_string(),
    }
}
