//! Verification of OCSP staples presented during a TLS handshake.
//!
//! The core is [`StapleValidator`]: given the verified chain and the stapled
//! OCSP response of a finished handshake it decides whether the peer's leaf
//! certificate is currently good, without contacting the responder. The
//! remaining modules are the client plumbing of the `staplechecker` tool.
//!
//! ```no_run
//! use staplechecker::client::{ClientOptions, Target};
//! use staplechecker::{check_host, StapleValidator, TracingSink};
//!
//! let target = Target::parse("example.com")?;
//! let report = check_host(
//!     &target,
//!     &ClientOptions::default(),
//!     &StapleValidator::default(),
//!     &TracingSink,
//! );
//! println!("{}: accepted = {}", report.host, report.accepted);
//! # Ok::<(), staplechecker::CheckError>(())
//! ```

pub mod algorithm;
pub mod chain;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod response;
mod signature;
pub mod validator;

pub use chain::HandshakeState;
pub use diagnostics::{DiagnosticRecord, DiagnosticSink, MemorySink, TracingSink};
pub use error::{CheckError, ErrorKind};
pub use response::{CertStatus, StapleResponse};
pub use validator::{StapleReport, StapleValidator, ValidationVerdict, ValidatorOptions};

use client::{ClientOptions, Target};
use serde::Serialize;

/// Result of checking one host.
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub host: String,
    pub accepted: bool,
    /// Rejection reason or connection error
    pub reason: Option<String>,
    /// Decoded staple, when one was parsed
    pub staple: Option<StapleReport>,
}

impl HostReport {
    pub fn from_verdict(host: &str, verdict: &ValidationVerdict) -> Self {
        HostReport {
            host: host.to_string(),
            accepted: verdict.is_accepted(),
            reason: verdict.reason().map(ToString::to_string),
            staple: verdict.report().cloned(),
        }
    }

    pub fn from_error(host: &str, error: &CheckError) -> Self {
        HostReport {
            host: host.to_string(),
            accepted: false,
            reason: Some(error.to_string()),
            staple: None,
        }
    }
}

/// Connects to `target` and validates the staple it presents.
///
/// Connection failures are reported through `sink` and the returned report
/// like any other rejection.
pub fn check_host(
    target: &Target,
    options: &ClientOptions,
    validator: &StapleValidator,
    sink: &dyn DiagnosticSink,
) -> HostReport {
    let host = target.to_string();
    match client::fetch_handshake(target, options) {
        Ok(state) => {
            let verdict = validator.validate(&state, sink);
            HostReport::from_verdict(&host, &verdict)
        }
        Err(err) => {
            sink.emit(&DiagnosticRecord::Failure {
                detail: err.to_string(),
            });
            HostReport::from_error(&host, &err)
        }
    }
}
