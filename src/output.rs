//! Rendering of per-host results for the command line.

use crate::diagnostics::render_report;
use crate::HostReport;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use std::fmt::Write;
use strum_macros::{Display, EnumString};

/// Output formats selectable with `--output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
    Summary,
}

pub fn render(format: OutputFormat, reports: &[HostReport]) -> String {
    match format {
        OutputFormat::Text => text(reports),
        OutputFormat::Json => serde_json::to_string_pretty(reports)
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputFormat::Summary => summary(reports),
    }
}

fn text(reports: &[HostReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let _ = writeln!(out, "--------------------------------------");
        let _ = writeln!(out, "Host: {}", report.host);
        match &report.staple {
            Some(staple) => out.push_str(&render_report(staple, report.reason.as_deref())),
            None => {
                let reason = report.reason.as_deref().unwrap_or("no staple");
                let _ = writeln!(out, "error: {}", reason);
            }
        }
        let _ = writeln!(
            out,
            "Result: {}",
            if report.accepted { "ACCEPTED" } else { "REJECTED" }
        );
    }
    out
}

fn summary(reports: &[HostReport]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Host", "Status", "Verified", "Next Update", "Result"]);

    for report in reports {
        let (status, verified, next_update) = match &report.staple {
            Some(staple) => (
                staple.response.status.to_string(),
                staple.signature_verified.to_string(),
                staple
                    .response
                    .next_update
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        let result = if report.accepted {
            "ACCEPTED".to_string()
        } else {
            format!(
                "REJECTED: {}",
                report.reason.as_deref().unwrap_or("unknown reason")
            )
        };
        table.add_row(vec![
            Cell::new(&report.host),
            Cell::new(status),
            Cell::new(verified),
            Cell::new(next_update),
            Cell::new(result),
        ]);
    }
    format!("{}\n", table)
}
