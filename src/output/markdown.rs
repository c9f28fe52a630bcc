//! Markdown report generation
//!
//! This module renders a human-readable summary of a run: run information,
//! overall statistics, one section per source and its diagnosis.

use crate::output::{OutputResult, RunReport, SourceReport};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Maximum errors listed per source
const MAX_LISTED_ERRORS: usize = 20;

/// Writes the markdown report for a run
///
/// # Arguments
///
/// * `report` - The finished run report
/// * `output_path` - Path where the markdown file should be written
pub fn write_markdown_report(report: &RunReport, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(report);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run report as markdown
pub fn format_markdown_report(report: &RunReport) -> String {
    let mut md = String::new();

    md.push_str("# Harrow Run Report\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run ID**: {}\n", report.run_id));
    md.push_str(&format!("- **Started**: {}\n", report.started_at.to_rfc3339()));
    if let Some(finished) = &report.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    md.push_str(&format!(
        "- **Duration**: {:.2} seconds\n",
        report.elapsed_ms as f64 / 1000.0
    ));
    md.push_str(&format!(
        "- **Status**: {}\n",
        if report.ok { "ok" } else { "failed" }
    ));
    if report.dry_run {
        md.push_str("- **Dry run**: yes\n");
    }
    if let Some(hash) = &report.config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    md.push('\n');

    // Overall statistics
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!(
        "- **Sources**: {} ({} ok, {} failed)\n",
        report.sources_total, report.sources_ok, report.sources_failed
    ));
    md.push_str(&format!(
        "- **Pages**: {} attempted, {} succeeded\n",
        report.totals.pages_attempted, report.totals.pages_succeeded
    ));
    md.push_str(&format!("- **Links Found**: {}\n", report.totals.links_found));
    md.push_str(&format!(
        "- **Items**: {} parsed, {} valid, {} dropped, {} saved\n\n",
        report.totals.items_parsed,
        report.totals.items_valid,
        report.totals.items_dropped,
        report.totals.items_saved
    ));

    if report.sources.is_empty() {
        return md;
    }

    // Source table
    md.push_str("## Sources\n\n");
    md.push_str("| Source | Status | Engine | Pages | Links | Valid | Dropped |\n");
    md.push_str("|--------|--------|--------|-------|-------|-------|---------|\n");
    for source in &report.sources {
        md.push_str(&format!(
            "| {} | {} | {} | {}/{} | {} | {} | {} |\n",
            source.source_id,
            if source.ok { "ok" } else { "failed" },
            source.engine,
            source.pages_succeeded,
            source.pages_attempted,
            source.links_found,
            source.items_valid,
            source.items_dropped
        ));
    }
    md.push('\n');

    for source in &report.sources {
        format_source_section(&mut md, source);
    }

    md
}

fn format_source_section(md: &mut String, source: &SourceReport) {
    md.push_str(&format!("### {}\n\n", source.source_id));

    if let Some(error) = &source.error {
        md.push_str(&format!("**Error**: {}\n\n", error));
    }

    md.push_str(&format!("- **Discovery**: {}\n", source.discovery));
    md.push_str(&format!(
        "- **Listing pages**: {}/{}\n",
        source.listing_pages_succeeded, source.listing_pages_attempted
    ));
    md.push_str(&format!(
        "- **Detail pages**: {}/{}\n",
        source.detail_pages_succeeded, source.detail_pages_attempted
    ));
    md.push_str(&format!(
        "- **Links**: {} found, {} new, {} duplicate\n",
        source.links_found, source.links_new, source.links_duplicate
    ));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        source.success_rate()
    ));

    if !source.block_signals.is_empty() {
        md.push_str("| Block Signal | Count |\n");
        md.push_str("|--------------|-------|\n");
        for (signal, count) in &source.block_signals {
            md.push_str(&format!("| {} | {} |\n", signal, count));
        }
        md.push('\n');
    }

    if !source.diagnosis.is_empty() {
        md.push_str("**Diagnosis**\n\n");
        for hint in &source.diagnosis {
            md.push_str(&format!("- {}\n", hint));
        }
        md.push('\n');
    }

    if !source.errors.is_empty() {
        md.push_str("**Errors**\n\n");
        for error in source.errors.iter().take(MAX_LISTED_ERRORS) {
            md.push_str(&format!("- {}\n", error));
        }
        if source.errors.len() > MAX_LISTED_ERRORS {
            md.push_str(&format!(
                "\n... and {} more\n",
                source.errors.len() - MAX_LISTED_ERRORS
            ));
        }
        md.push('\n');
    }
}
