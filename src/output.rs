use std::io::{self, Write};

use serde::Serialize;

use crate::report::{CompareReport, StageReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_stage(report: &StageReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_compare(report: &CompareReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Final per-stage summary: counts, then every failed file by name.
pub fn print_stage_summary(report: &StageReport) {
    println!("{} summary", report.stage);
    println!("  total files:     {}", report.total());
    for action in ["converted", "resampled", "rewritten", "copied", "annotated"] {
        let count = report.count(action);
        if count > 0 {
            println!("  {action}:       {count}");
        }
    }
    let already = report.count("already-present");
    if already > 0 {
        println!("  already present: {already}");
    }
    let skipped = report.count("skipped");
    if skipped > 0 {
        println!("  skipped:         {skipped}");
    }
    let warnings = report.count("warning");
    if warnings > 0 {
        println!("  warnings:        {warnings}");
    }
    println!("  failed:          {}", report.failed());
    for failure in report.failures() {
        println!(
            "    {} ({})",
            failure.path,
            failure.reason.as_deref().unwrap_or("unknown")
        );
    }
}

pub fn print_compare_summary(report: &CompareReport) {
    println!("comparison summary");
    println!("  files compared: {}", report.files.len());
    println!("  files skipped:  {}", report.skipped.len());
    for aggregate in &report.aggregates {
        println!(
            "  {}: correlation {:.4} +/- {:.4}, rms error {:.3e} +/- {:.3e} ({} files)",
            aggregate.format,
            aggregate.mean_correlation,
            aggregate.std_correlation,
            aggregate.mean_rms_error,
            aggregate.std_rms_error,
            aggregate.files_compared,
        );
    }
    for skip in &report.skipped {
        println!(
            "    skipped {} ({})",
            skip.path,
            skip.reason.as_deref().unwrap_or("unknown")
        );
    }
}
