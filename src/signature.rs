//! OCSP response signature verification.
//!
//! The response must be signed either by the issuer itself or by a delegated
//! responder: a certificate embedded in the response, issued by the issuer's
//! key and carrying the id-kp-OCSPSigning extended key usage.

use crate::algorithm;
use crate::error::ErrorKind;
use crate::response::{decode_certificate, SignedResponse};
use const_oid::db::rfc5280::{ID_CE_EXT_KEY_USAGE, ID_KP_OCSP_SIGNING};
use der::{Decode, Encode};
use openssl::hash::{hash, MessageDigest};
use openssl::pkey::{PKey, Public};
use openssl::sign::Verifier;
use openssl::x509::{X509Ref, X509};
use std::fmt;
use x509_cert::ext::pkix::ExtendedKeyUsage;
use x509_cert::Certificate;
use x509_ocsp::ResponderId;

fn bad_signature(detail: impl fmt::Display) -> ErrorKind {
    ErrorKind::BadSignature {
        detail: detail.to_string(),
    }
}

/// SHA-1 of the subject public key bits, as used by byKey responder IDs.
fn key_hash(cert: &Certificate) -> Result<Vec<u8>, ErrorKind> {
    let key = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    let digest = hash(MessageDigest::sha1(), key).map_err(bad_signature)?;
    Ok(digest.to_vec())
}

fn responder_is(responder_id: &ResponderId, cert: &Certificate) -> Result<bool, ErrorKind> {
    match responder_id {
        ResponderId::ByName(name) => Ok(*name == cert.tbs_certificate.subject),
        ResponderId::ByKey(key) => Ok(key_hash(cert)? == key.as_bytes()),
    }
}

fn has_ocsp_signing(cert: &Certificate) -> Result<bool, ErrorKind> {
    let extensions = match &cert.tbs_certificate.extensions {
        Some(extensions) => extensions,
        None => return Ok(false),
    };
    for extension in extensions.iter().filter(|ext| ext.extn_id == ID_CE_EXT_KEY_USAGE) {
        let usage =
            ExtendedKeyUsage::from_der(extension.extn_value.as_bytes()).map_err(bad_signature)?;
        if usage.0.contains(&ID_KP_OCSP_SIGNING) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Returns the key of the delegated responder named by the response.
fn delegated_key(
    signed: &SignedResponse,
    issuer: &X509Ref,
    issuer_cert: &Certificate,
) -> Result<PKey<Public>, ErrorKind> {
    let mut delegate = None;
    for cert in &signed.certs {
        if responder_is(&signed.responder_id, cert)? {
            delegate = Some(cert);
            break;
        }
    }
    let delegate = delegate.ok_or_else(|| {
        bad_signature("responder is neither the issuer nor a certificate included in the response")
    })?;

    if delegate.tbs_certificate.issuer != issuer_cert.tbs_certificate.subject {
        return Err(bad_signature(
            "delegated responder certificate names a different issuer",
        ));
    }
    let delegate_x509 = delegate
        .to_der()
        .map_err(bad_signature)
        .and_then(|der| X509::from_der(&der).map_err(bad_signature))?;
    let issuer_key = issuer.public_key().map_err(bad_signature)?;
    if !delegate_x509.verify(&issuer_key).map_err(bad_signature)? {
        return Err(bad_signature(
            "delegated responder certificate is not signed by the issuer",
        ));
    }
    if !has_ocsp_signing(delegate)? {
        return Err(bad_signature(
            "delegated responder certificate lacks the OCSPSigning extended key usage",
        ));
    }
    delegate_x509.public_key().map_err(bad_signature)
}

/// Checks that `signed` was signed by `issuer` or by a responder it delegated to.
pub(crate) fn verify(signed: &SignedResponse, issuer: &X509Ref) -> Result<(), ErrorKind> {
    let issuer_cert = decode_certificate(issuer).map_err(bad_signature)?;
    let key = if responder_is(&signed.responder_id, &issuer_cert)? {
        issuer.public_key().map_err(bad_signature)?
    } else {
        delegated_key(signed, issuer, &issuer_cert)?
    };

    let valid = match algorithm::signature_digest(&signed.algorithm).map_err(bad_signature)? {
        Some(md) => {
            let mut verifier = Verifier::new(md, &key).map_err(bad_signature)?;
            verifier.update(&signed.tbs).map_err(bad_signature)?;
            verifier.verify(&signed.signature).map_err(bad_signature)?
        }
        None => {
            let mut verifier = Verifier::new_without_digest(&key).map_err(bad_signature)?;
            verifier
                .verify_oneshot(&signed.signature, &signed.tbs)
                .map_err(bad_signature)?
        }
    };

    if valid {
        Ok(())
    } else {
        Err(bad_signature(format!(
            "{} signature does not match the responder key",
            algorithm::name(&signed.algorithm)
        )))
    }
}
