use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::{validate, Report};

/// Parse and validate a report from its JSON text.
pub fn parse_report(content: &str) -> Result<Report> {
    let report: Report = serde_json::from_str(content).context("Failed to parse report JSON")?;
    validate(&report).context("Report failed validation")?;
    Ok(report)
}

/// Load a reference report, failing fast if it violates any invariant.
pub fn load_report(path: &Path) -> Result<Report> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;

    let report =
        parse_report(&content).with_context(|| format!("Invalid report: {}", path.display()))?;

    debug!(
        path = %path.display(),
        groups = report.asset_groups.len(),
        "Loaded report"
    );
    Ok(report)
}

/// Write a report atomically with four-space indentation.
///
/// The JSON is written to a temporary file next to `path` and renamed over
/// it, so a reader never observes a partially written report.
pub fn write_report(path: &Path, report: &Report) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut file, formatter);
    report
        .serialize(&mut serializer)
        .context("Failed to serialize report")?;
    file.write_all(b"\n").context("Failed to write report")?;
    file.flush().context("Failed to flush report")?;

    file.persist(path)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

    info!(path = %path.display(), "Wrote report");
    Ok(())
}
