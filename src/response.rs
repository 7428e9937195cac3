//! Decoding of stapled OCSP responses.
//!
//! A staple is only accepted for the connection it was presented on: the
//! single response selected for the leaf must carry the leaf's serial number
//! and hashes of the issuer's name and key computed with the CertID's own hash
//! algorithm.

use crate::algorithm;
use crate::error::ErrorKind;
use chrono::{DateTime, NaiveDateTime, Utc};
use const_oid::db::rfc6960::ID_PKIX_OCSP_BASIC;
use const_oid::ObjectIdentifier;
use der::asn1::{AnyRef, GeneralizedTime};
use der::{Decode, Encode, Header, Reader, SliceReader, Tag};
use openssl::hash::hash;
use openssl::x509::X509Ref;
use serde::Serialize;
use std::fmt;
use x509_cert::Certificate;
use x509_ocsp::{
    BasicOcspResponse, CertId, OcspResponse, OcspResponseStatus, ResponderId, SingleResponse,
};

/// Revocation status of the leaf certificate as reported by the responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CertStatus {
    Good,
    Revoked {
        revoked_at: DateTime<Utc>,
        /// CRL reason code name, when the responder gave one
        reason: Option<String>,
    },
    Unknown,
}

/// A decoded staple bound to the leaf/issuer pair it was checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StapleResponse {
    pub status: CertStatus,
    pub produced_at: DateTime<Utc>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    /// Name of the algorithm the responder signed with
    pub signature_algorithm: String,
    /// Serial number the response was issued for, colon separated hex
    pub serial_number: String,
}

impl StapleResponse {
    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            CertStatus::Revoked { revoked_at, .. } => Some(revoked_at),
            _ => None,
        }
    }
}

/// The signed part of a response and what is needed to check it.
pub(crate) struct SignedResponse {
    pub tbs: Vec<u8>,
    pub signature: Vec<u8>,
    pub algorithm: ObjectIdentifier,
    pub responder_id: ResponderId,
    pub certs: Vec<Certificate>,
}

fn parse_failure(detail: impl fmt::Display) -> ErrorKind {
    ErrorKind::ParseFailure {
        detail: detail.to_string(),
    }
}

fn binding_mismatch(detail: impl fmt::Display) -> ErrorKind {
    ErrorKind::BindingMismatch {
        detail: detail.to_string(),
    }
}

pub(crate) fn decode_certificate(cert: &X509Ref) -> Result<Certificate, String> {
    let der = cert.to_der().map_err(|e| e.to_string())?;
    Certificate::from_der(&der).map_err(|e| e.to_string())
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn responder_status_name(status: OcspResponseStatus) -> String {
    let debug = format!("{:?}", status);
    let mut chars = debug.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => debug,
    }
}

/// Converts a DER time field to UTC, truncated to whole seconds.
fn decode_time<T: Encode>(time: &T) -> Result<DateTime<Utc>, ErrorKind> {
    let encoded = time.to_der().map_err(parse_failure)?;
    let generalized = GeneralizedTime::from_der(&encoded).map_err(parse_failure)?;
    let secs = i64::try_from(generalized.to_unix_duration().as_secs()).map_err(parse_failure)?;
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| parse_failure("timestamp out of range"))
}

/// Checks the CertID hashes against `issuer`, using the CertID's hash algorithm.
fn issued_by(cert_id: &CertId, issuer: &Certificate) -> Result<(), ErrorKind> {
    let md = algorithm::digest(&cert_id.hash_algorithm.oid).ok_or_else(|| {
        parse_failure(format!(
            "unsupported CertID hash algorithm {}",
            cert_id.hash_algorithm.oid
        ))
    })?;

    let issuer_name = issuer.tbs_certificate.subject.to_der().map_err(parse_failure)?;
    let name_hash = hash(md, &issuer_name).map_err(parse_failure)?;
    if &*name_hash != cert_id.issuer_name_hash.as_bytes() {
        return Err(binding_mismatch("issuer name hash differs"));
    }

    let issuer_key = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    let key_hash = hash(md, issuer_key).map_err(parse_failure)?;
    if &*key_hash != cert_id.issuer_key_hash.as_bytes() {
        return Err(binding_mismatch("issuer key hash differs"));
    }
    Ok(())
}

/// Selects the single response issued for `leaf` by `issuer`.
///
/// Entries for the leaf serial are tried in order; when none matches the
/// issuer, the first entry's mismatch is reported.
fn bind<'a>(
    responses: &'a [SingleResponse],
    leaf: &Certificate,
    issuer: &Certificate,
) -> Result<&'a SingleResponse, ErrorKind> {
    let serial = &leaf.tbs_certificate.serial_number;
    let mut first_error = None;
    for single in responses
        .iter()
        .filter(|single| single.cert_id.serial_number == *serial)
    {
        match issued_by(&single.cert_id, issuer) {
            Ok(()) => return Ok(single),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| {
        binding_mismatch(format!(
            "no response for serial number {}",
            hex(serial.as_bytes())
        ))
    }))
}

/// Rewrites GeneralizedTime values with fractional seconds to whole seconds,
/// the only form the DER time type decodes.
fn truncate_fractional_times(input: &[u8]) -> Result<Vec<u8>, ErrorKind> {
    let mut reader = SliceReader::new(input).map_err(parse_failure)?;
    let mut out = Vec::with_capacity(input.len());
    while !reader.is_finished() {
        let header = Header::decode(&mut reader).map_err(parse_failure)?;
        let value = reader.read_slice(header.length).map_err(parse_failure)?;
        let value = if header.tag == Tag::GeneralizedTime {
            whole_seconds(value)?
        } else if header.tag.is_constructed() {
            truncate_fractional_times(value)?
        } else {
            value.to_vec()
        };
        Header::new(header.tag, value.len())
            .and_then(|header| header.encode_to_vec(&mut out))
            .map_err(parse_failure)?;
        out.extend_from_slice(&value);
    }
    Ok(out)
}

fn whole_seconds(value: &[u8]) -> Result<Vec<u8>, ErrorKind> {
    if !value.contains(&b'.') {
        return Ok(value.to_vec());
    }
    let text = std::str::from_utf8(value).map_err(parse_failure)?;
    let time = NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S%.fZ")
        .map_err(|e| parse_failure(format!("GeneralizedTime {}: {}", text, e)))?;
    Ok(time.format("%Y%m%d%H%M%SZ").to_string().into_bytes())
}

/// The `tbsResponseData` element of a BasicOCSPResponse exactly as received.
fn signed_bytes(basic: &[u8]) -> der::Result<Vec<u8>> {
    let mut reader = SliceReader::new(basic)?;
    Header::decode(&mut reader)?.tag.assert_eq(Tag::Sequence)?;
    AnyRef::decode(&mut reader)?.to_der()
}

/// Decodes `raw` and binds it to the `leaf`/`issuer` pair.
pub(crate) fn parse(
    raw: &[u8],
    leaf: &X509Ref,
    issuer: &X509Ref,
) -> Result<(StapleResponse, SignedResponse), ErrorKind> {
    if raw.is_empty() {
        return Err(parse_failure("empty staple"));
    }

    let envelope = OcspResponse::from_der(raw).map_err(parse_failure)?;
    if envelope.response_status != OcspResponseStatus::Successful {
        return Err(ErrorKind::InvalidStapleStatus {
            status: responder_status_name(envelope.response_status),
        });
    }
    let bytes = envelope
        .response_bytes
        .ok_or_else(|| parse_failure("successful response without response bytes"))?;
    if bytes.response_type != ID_PKIX_OCSP_BASIC {
        return Err(parse_failure(format!(
            "unsupported response type {}",
            bytes.response_type
        )));
    }
    let basic_der = bytes.response.as_bytes();
    let basic = BasicOcspResponse::from_der(&truncate_fractional_times(basic_der)?)
        .map_err(parse_failure)?;

    let leaf = decode_certificate(leaf).map_err(parse_failure)?;
    let issuer = decode_certificate(issuer).map_err(parse_failure)?;
    let tbs_data = &basic.tbs_response_data;
    let single = bind(&tbs_data.responses, &leaf, &issuer)?;

    let status = match &single.cert_status {
        x509_ocsp::CertStatus::Good(_) => CertStatus::Good,
        x509_ocsp::CertStatus::Revoked(info) => CertStatus::Revoked {
            revoked_at: decode_time(&info.revocation_time)?,
            reason: info
                .revocation_reason
                .as_ref()
                .map(|reason| format!("{:?}", reason)),
        },
        x509_ocsp::CertStatus::Unknown(_) => CertStatus::Unknown,
    };
    let next_update = match &single.next_update {
        Some(time) => Some(decode_time(time)?),
        None => None,
    };

    let response = StapleResponse {
        status,
        produced_at: decode_time(&tbs_data.produced_at)?,
        this_update: decode_time(&single.this_update)?,
        next_update,
        signature_algorithm: algorithm::name(&basic.signature_algorithm.oid),
        serial_number: hex(single.cert_id.serial_number.as_bytes()),
    };

    let signed = SignedResponse {
        tbs: signed_bytes(basic_der).map_err(parse_failure)?,
        signature: basic.signature.raw_bytes().to_vec(),
        algorithm: basic.signature_algorithm.oid,
        responder_id: tbs_data.responder_id.clone(),
        certs: basic.certs.clone().unwrap_or_default(),
    };

    Ok((response, signed))
}
