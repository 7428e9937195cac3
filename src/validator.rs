//! Staple validation pipeline.
//!
//! Each call runs the chain extractor, the response parser and the signature
//! and status evaluator once, in that order, and returns a
//! [`ValidationVerdict`]. A verdict is `Accept` only when the responder says
//! `good` and the response signature verifies; every other outcome rejects the
//! connection.
//!
//! # Example
//!
//! ```no_run
//! use staplechecker::{HandshakeState, MemorySink, StapleValidator, ValidatorOptions};
//!
//! let validator = StapleValidator::new(ValidatorOptions::default());
//! let sink = MemorySink::default();
//! let verdict = validator.validate(&HandshakeState::default(), &sink);
//! assert!(!verdict.is_accepted());
//! ```

use crate::algorithm::certificate_algorithm;
use crate::chain::{self, HandshakeState};
use crate::diagnostics::{DiagnosticRecord, DiagnosticSink};
use crate::error::ErrorKind;
use crate::response::{self, CertStatus, StapleResponse};
use crate::signature;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Tolerance applied to response time bounds when freshness is checked.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Tunables for [`StapleValidator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorOptions {
    /// Reject responses whose `thisUpdate`/`nextUpdate` window excludes now.
    /// Off by default: an expired but `good` staple is accepted.
    pub check_freshness: bool,
    pub max_clock_skew: Duration,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        ValidatorOptions {
            check_freshness: false,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
        }
    }
}

/// A decoded staple together with the outcome of its signature check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StapleReport {
    pub response: StapleResponse,
    pub signature_verified: bool,
    pub leaf_signature_algorithm: String,
    pub issuer_signature_algorithm: String,
}

/// Outcome of validating one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accept(StapleReport),
    Reject {
        reason: ErrorKind,
        /// Present whenever the staple was decoded before rejection
        report: Option<StapleReport>,
    },
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationVerdict::Accept(_))
    }

    pub fn reason(&self) -> Option<&ErrorKind> {
        match self {
            ValidationVerdict::Accept(_) => None,
            ValidationVerdict::Reject { reason, .. } => Some(reason),
        }
    }

    pub fn report(&self) -> Option<&StapleReport> {
        match self {
            ValidationVerdict::Accept(report) => Some(report),
            ValidationVerdict::Reject { report, .. } => report.as_ref(),
        }
    }

    /// Converts into the form a TLS verification hook returns.
    pub fn into_result(self) -> Result<StapleReport, ErrorKind> {
        match self {
            ValidationVerdict::Accept(report) => Ok(report),
            ValidationVerdict::Reject { reason, .. } => Err(reason),
        }
    }
}

/// Validates OCSP staples. Holds no per-handshake state and may be shared
/// between threads.
#[derive(Debug, Clone, Default)]
pub struct StapleValidator {
    options: ValidatorOptions,
}

impl StapleValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        StapleValidator { options }
    }

    /// Validates `state` against the current time and emits one diagnostic
    /// record to `sink`.
    pub fn validate(&self, state: &HandshakeState, sink: &dyn DiagnosticSink) -> ValidationVerdict {
        self.validate_at(state, Utc::now(), sink)
    }

    /// Like [`validate`](Self::validate) with an explicit notion of now.
    pub fn validate_at(
        &self,
        state: &HandshakeState,
        now: DateTime<Utc>,
        sink: &dyn DiagnosticSink,
    ) -> ValidationVerdict {
        let verdict = self.evaluate(state, now);
        sink.emit(&DiagnosticRecord::from_verdict(&verdict));
        verdict
    }

    /// Runs the pipeline without emitting diagnostics.
    pub fn evaluate(&self, state: &HandshakeState, now: DateTime<Utc>) -> ValidationVerdict {
        let (leaf, issuer) = match chain::extract(state) {
            Ok(pair) => pair,
            Err(reason) => return reject(reason, None),
        };
        debug!(
            chain_len = state.verified_chains.first().map_or(0, Vec::len),
            "chain extracted"
        );

        let (response, signed) = match response::parse(&state.ocsp_response, leaf, issuer) {
            Ok(parsed) => parsed,
            Err(reason) => return reject(reason, None),
        };
        debug!(status = %response.status, serial = %response.serial_number, "staple parsed");

        let signature = signature::verify(&signed, issuer);
        debug!(verified = signature.is_ok(), "signature checked");

        let report = StapleReport {
            response,
            signature_verified: signature.is_ok(),
            leaf_signature_algorithm: certificate_algorithm(leaf),
            issuer_signature_algorithm: certificate_algorithm(issuer),
        };
        match self.judge(&report.response, signature, now) {
            Ok(()) => ValidationVerdict::Accept(report),
            Err(reason) => reject(reason, Some(report)),
        }
    }

    fn judge(
        &self,
        response: &StapleResponse,
        signature: Result<(), ErrorKind>,
        now: DateTime<Utc>,
    ) -> Result<(), ErrorKind> {
        match response.status {
            CertStatus::Revoked { revoked_at, .. } => return Err(ErrorKind::Revoked { revoked_at }),
            CertStatus::Unknown => return Err(ErrorKind::UnknownStatus),
            CertStatus::Good => {}
        }
        signature?;
        if self.options.check_freshness {
            check_freshness(response, now, self.options.max_clock_skew)?;
        }
        Ok(())
    }
}

fn reject(reason: ErrorKind, report: Option<StapleReport>) -> ValidationVerdict {
    ValidationVerdict::Reject { reason, report }
}

fn check_freshness(
    response: &StapleResponse,
    now: DateTime<Utc>,
    skew: Duration,
) -> Result<(), ErrorKind> {
    let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
    if let Some(latest) = now.checked_add_signed(skew) {
        if response.this_update > latest {
            return Err(ErrorKind::Stale {
                detail: format!(
                    "thisUpdate {} is in the future",
                    response.this_update.to_rfc3339()
                ),
            });
        }
    }
    let earliest = now.checked_sub_signed(skew);
    if let (Some(next_update), Some(earliest)) = (response.next_update, earliest) {
        if next_update < earliest {
            return Err(ErrorKind::Stale {
                detail: format!("nextUpdate {} has passed", next_update.to_rfc3339()),
            });
        }
    }
    Ok(())
}
