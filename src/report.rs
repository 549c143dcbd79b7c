use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;

use crate::error::PipelineError;
use crate::tree::write_json_atomic;

/// Outcome of one file in a batch run.
///
/// `action` is the short machine-readable verb (`converted`, `skipped`,
/// `failed`, `rewritten`, `copied`, `annotated`, `already-present`,
/// `warning`); `reason` carries the cause for failures and warnings so bad
/// files are individually enumerable, not just counted.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FileOutcome {
    pub fn new(path: &Utf8Path, action: &str) -> Self {
        Self {
            path: path.to_string(),
            action: action.to_string(),
            reason: None,
        }
    }

    pub fn with_reason(path: &Utf8Path, action: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            action: action.to_string(),
            reason: Some(reason.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.action == "failed"
    }
}

/// Accumulated per-file outcomes for one stage invocation.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub input_dir: String,
    pub output_dir: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub files: Vec<FileOutcome>,
}

impl StageReport {
    pub fn start(stage: &str, input_dir: &Utf8Path, output_dir: &Utf8Path) -> Self {
        Self {
            stage: stage.to_string(),
            input_dir: input_dir.to_string(),
            output_dir: output_dir.to_string(),
            started_at: timestamp(Local::now()),
            finished_at: None,
            files: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: FileOutcome) {
        self.files.push(outcome);
    }

    pub fn merge(&mut self, outcomes: Vec<FileOutcome>) {
        self.files.extend(outcomes);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(timestamp(Local::now()));
    }

    pub fn count(&self, action: &str) -> usize {
        self.files.iter().filter(|f| f.action == action).count()
    }

    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| f.is_failure()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.is_failure())
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    /// Persist under `<dir>/conversion_reports/` with a timestamped name.
    pub fn save(&self, dir: &Utf8Path) -> Result<Utf8PathBuf, PipelineError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir
            .join("conversion_reports")
            .join(format!("{}_report_{stamp}.json", self.stage));
        write_json_atomic(&path, self)?;
        Ok(path)
    }
}

/// Per-channel fidelity statistics for one original/converted pair.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelMetrics {
    pub label: String,
    pub correlation: f64,
    pub rms_error: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatMetrics {
    pub format: String,
    pub mean_correlation: f64,
    pub rms_error: f64,
    pub channels: Vec<ChannelMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileComparison {
    /// `sub-<id>_task-<name>` identity shared by the compared files.
    pub key: String,
    pub relative_path: String,
    pub common_channels: usize,
    pub samples_compared: usize,
    pub truncated: bool,
    pub formats: Vec<FormatMetrics>,
}

/// Mean/standard-deviation across compared files, one row per format.
#[derive(Debug, Clone, Serialize)]
pub struct FormatAggregate {
    pub format: String,
    pub files_compared: usize,
    pub mean_correlation: f64,
    pub std_correlation: f64,
    pub mean_rms_error: f64,
    pub std_rms_error: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareReport {
    pub original_dir: String,
    pub converted_dirs: Vec<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub files: Vec<FileComparison>,
    pub skipped: Vec<FileOutcome>,
    pub aggregates: Vec<FormatAggregate>,
}

impl CompareReport {
    pub fn start(original_dir: &Utf8Path, converted_dirs: &[Utf8PathBuf]) -> Self {
        Self {
            original_dir: original_dir.to_string(),
            converted_dirs: converted_dirs.iter().map(|d| d.to_string()).collect(),
            started_at: timestamp(Local::now()),
            finished_at: None,
            files: Vec::new(),
            skipped: Vec::new(),
            aggregates: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.aggregates = aggregate(&self.files);
        self.finished_at = Some(timestamp(Local::now()));
    }

    pub fn save(&self, dir: &Utf8Path) -> Result<Utf8PathBuf, PipelineError> {
        let path = dir.join("comparison_results.json");
        write_json_atomic(&path, self)?;
        Ok(path)
    }
}

fn aggregate(files: &[FileComparison]) -> Vec<FormatAggregate> {
    let mut formats: Vec<String> = Vec::new();
    for file in files {
        for metrics in &file.formats {
            if !formats.contains(&metrics.format) {
                formats.push(metrics.format.clone());
            }
        }
    }

    formats
        .into_iter()
        .map(|format| {
            let correlations: Vec<f64> = files
                .iter()
                .flat_map(|f| &f.formats)
                .filter(|m| m.format == format)
                .map(|m| m.mean_correlation)
                .collect();
            let rms_errors: Vec<f64> = files
                .iter()
                .flat_map(|f| &f.formats)
                .filter(|m| m.format == format)
                .map(|m| m.rms_error)
                .collect();
            FormatAggregate {
                format,
                files_compared: correlations.len(),
                mean_correlation: mean(&correlations),
                std_correlation: std_dev(&correlations),
                mean_rms_error: mean(&rms_errors),
                std_rms_error: std_dev(&rms_errors),
            }
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn timestamp(now: DateTime<Local>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;

    #[test]
    fn counts_by_action() {
        let mut report = StageReport::start("convert", Utf8Path::new("in"), Utf8Path::new("out"));
        report.record(FileOutcome::new(Utf8Path::new("a_eeg.set"), "converted"));
        report.record(FileOutcome::new(Utf8Path::new("b_eeg.set"), "skipped"));
        report.record(FileOutcome::with_reason(
            Utf8Path::new("c_eeg.set"),
            "failed",
            "truncated container",
        ));
        report.finish();

        assert_eq!(report.total(), 3);
        assert_eq!(report.count("converted"), 1);
        assert_eq!(report.count("skipped"), 1);
        assert_eq!(report.failed(), 1);
        let failed: Vec<&str> = report.failures().map(|f| f.path.as_str()).collect();
        assert_eq!(failed, vec!["c_eeg.set"]);
    }

    #[test]
    fn aggregate_is_per_format() {
        let files = vec![
            FileComparison {
                key: "sub-01_task-rest".to_string(),
                relative_path: "a".to_string(),
                common_channels: 2,
                samples_compared: 100,
                truncated: false,
                formats: vec![
                    FormatMetrics {
                        format: "edf".to_string(),
                        mean_correlation: 0.99,
                        rms_error: 0.01,
                        channels: Vec::new(),
                    },
                    FormatMetrics {
                        format: "bdf".to_string(),
                        mean_correlation: 1.0,
                        rms_error: 0.001,
                        channels: Vec::new(),
                    },
                ],
            },
            FileComparison {
                key: "sub-02_task-rest".to_string(),
                relative_path: "b".to_string(),
                common_channels: 2,
                samples_compared: 100,
                truncated: false,
                formats: vec![FormatMetrics {
                    format: "edf".to_string(),
                    mean_correlation: 0.97,
                    rms_error: 0.03,
                    channels: Vec::new(),
                }],
            },
        ];

        let aggregates = aggregate(&files);
        let edf = aggregates.iter().find(|a| a.format == "edf").unwrap();
        assert_eq!(edf.files_compared, 2);
        assert!((edf.mean_correlation - 0.98).abs() < 1e-12);
        let bdf = aggregates.iter().find(|a| a.format == "bdf").unwrap();
        assert_eq!(bdf.files_compared, 1);
        assert_eq!(bdf.std_correlation, 0.0);
    }
}
