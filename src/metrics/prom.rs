use lazy_static::lazy_static;
use prometheus::{labels, register_gauge, Gauge};

use staplechecker::{CertStatus, HostReport};

lazy_static! {
    static ref STAPLECHECKER_STAPLE_STATUS: Gauge =
        register_gauge!("staplechecker_staple_status", "OCSP staple status").unwrap();
    static ref STAPLECHECKER_SIGNATURE_VERIFIED: Gauge = register_gauge!(
        "staplechecker_signature_verified",
        "OCSP staple signature verified"
    )
    .unwrap();
}

/// Gauge value for a host: 0 = failed before a staple was parsed, 1 = Good,
/// 2 = Unknown, 3 = Revoked
pub fn status_value(report: &HostReport) -> f64 {
    match report.staple.as_ref().map(|staple| &staple.response.status) {
        None => 0.0,
        Some(CertStatus::Good) => 1.0,
        Some(CertStatus::Unknown) => 2.0,
        Some(CertStatus::Revoked { .. }) => 3.0,
    }
}

/// Function to push metrics to prometheus
/// # Arguments
/// * `results` - Host reports to export
/// * `prometheus_address` - Push gateway address
pub fn prometheus_metrics(results: &[HostReport], prometheus_address: &str) {
    for report in results.iter() {
        STAPLECHECKER_STAPLE_STATUS.set(status_value(report));
        let verified = report
            .staple
            .as_ref()
            .map_or(false, |staple| staple.signature_verified);
        STAPLECHECKER_SIGNATURE_VERIFIED.set(if verified { 1.0 } else { 0.0 });

        let metric_families = prometheus::gather();
        let prometheus_client = prometheus::push_metrics(
            "staplechecker",
            labels! {
                "instance".to_owned() => "staplechecker".to_owned(),
                "job".to_owned() => "staplechecker".to_owned(),
                "host".to_owned() => report.host.to_owned(),
                "accepted".to_owned() => report.accepted.to_string(),
            },
            &format!("{}/metrics/job", prometheus_address),
            metric_families,
            None,
        );

        if let Err(e) = prometheus_client {
            tracing::warn!(host = %report.host, error = %e, "failed to push metrics to prometheus");
        }
    }
}
