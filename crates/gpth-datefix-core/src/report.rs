use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::date::DateSource;
use crate::pipeline::{FileReport, Status};
use crate::summary::RunSummary;

#[derive(Serialize)]
struct FileEntry {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    renamed_from: Option<String>,
    status: Status,
    source: DateSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct RunReport<'a> {
    summary: &'a RunSummary,
    files: Vec<FileEntry>,
}

fn portable(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Write every file's outcome plus the run summary as pretty JSON.
pub fn write_report(reports: &[FileReport], summary: &RunSummary, report_path: &Path) -> anyhow::Result<()> {
    let files = reports
        .iter()
        .map(|r| FileEntry {
            path: portable(&r.path),
            renamed_from: r.renamed_from.as_deref().map(portable),
            status: r.outcome.status(),
            source: r.resolved.source,
            date: r.resolved.date,
            reason: r.outcome.reason(),
            warnings: r.warnings.clone(),
        })
        .collect();

    let file = std::fs::File::create(report_path)?;
    serde_json::to_writer_pretty(file, &RunReport { summary, files })?;

    Ok(())
}
