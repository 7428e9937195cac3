//! Diagnostic records emitted by the validator.
//!
//! Every validation produces exactly one [`DiagnosticRecord`]. When the staple
//! was decoded the record carries the full status block, even if the
//! connection is rejected; earlier failures carry only the error detail.
//! Records are handed to a [`DiagnosticSink`] as a whole so that concurrent
//! validations never interleave inside a record.

use crate::response::CertStatus;
use crate::validator::{StapleReport, ValidationVerdict};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticRecord {
    /// The staple was decoded
    Status {
        report: StapleReport,
        /// Rejection reason, if the connection was refused
        rejection: Option<String>,
    },
    /// Validation stopped before a response was available
    Failure { detail: String },
}

impl DiagnosticRecord {
    pub fn from_verdict(verdict: &ValidationVerdict) -> Self {
        match verdict {
            ValidationVerdict::Accept(report) => DiagnosticRecord::Status {
                report: report.clone(),
                rejection: None,
            },
            ValidationVerdict::Reject {
                reason,
                report: Some(report),
            } => DiagnosticRecord::Status {
                report: report.clone(),
                rejection: Some(reason.to_string()),
            },
            ValidationVerdict::Reject {
                reason,
                report: None,
            } => DiagnosticRecord::Failure {
                detail: reason.to_string(),
            },
        }
    }
}

/// Destination for diagnostic records.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, record: &DiagnosticRecord);
}

/// Writes each record as a single `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, record: &DiagnosticRecord) {
        match record {
            DiagnosticRecord::Status { report, rejection } => {
                let response = &report.response;
                info!(
                    target: "staplechecker::staple",
                    status = %response.status,
                    revoked_at = ?response.revoked_at().map(|t| t.to_rfc3339()),
                    produced_at = %response.produced_at.to_rfc3339(),
                    this_update = %response.this_update.to_rfc3339(),
                    next_update = ?response.next_update.map(|t| t.to_rfc3339()),
                    verified = report.signature_verified,
                    response_algorithm = %response.signature_algorithm,
                    leaf_algorithm = %report.leaf_signature_algorithm,
                    issuer_algorithm = %report.issuer_signature_algorithm,
                    rejection = ?rejection,
                    "OCSP staple"
                );
            }
            DiagnosticRecord::Failure { detail } => {
                warn!(
                    target: "staplechecker::staple",
                    detail = %detail,
                    "OCSP staple check failed"
                );
            }
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, record: &DiagnosticRecord) {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(record.clone());
    }
}

fn time(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Formats the status block of a decoded staple.
pub fn render_report(report: &StapleReport, rejection: Option<&str>) -> String {
    let response = &report.response;
    let mut out = String::new();
    let _ = writeln!(out, "--- OCSP Response ---");
    let _ = writeln!(out, "Status: {}", response.status);
    if let CertStatus::Revoked { revoked_at, reason } = &response.status {
        let _ = writeln!(out, "RevokedAt : {}", time(revoked_at));
        if let Some(reason) = reason {
            let _ = writeln!(out, "Reason    : {}", reason);
        }
    }
    let _ = writeln!(out, "ProducedAt: {}", time(&response.produced_at));
    let _ = writeln!(out, "ThisUpdate: {}", time(&response.this_update));
    let next_update = response
        .next_update
        .as_ref()
        .map(time)
        .unwrap_or_else(|| "none".to_string());
    let _ = writeln!(out, "NextUpdate: {}", next_update);
    let _ = writeln!(out);
    let _ = writeln!(out, "--- OCSP Signature ---");
    let _ = writeln!(out, "Verified: {}", report.signature_verified);
    let _ = writeln!(out);
    let _ = writeln!(out, "--- Signature Algorithms ---");
    let _ = writeln!(out, "OCSP Response     : {}", response.signature_algorithm);
    let _ = writeln!(out, "Leaf Certificate  : {}", report.leaf_signature_algorithm);
    let _ = writeln!(out, "Issuer Certificate: {}", report.issuer_signature_algorithm);
    if let Some(rejection) = rejection {
        let _ = writeln!(out);
        let _ = writeln!(out, "Rejected: {}", rejection);
    }
    out
}

/// Formats a record as one block of text.
pub fn render_text(record: &DiagnosticRecord) -> String {
    match record {
        DiagnosticRecord::Status { report, rejection } => {
            render_report(report, rejection.as_deref())
        }
        DiagnosticRecord::Failure { detail } => format!("error: {}\n", detail),
    }
}
