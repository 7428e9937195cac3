//! Algorithm identifier lookups backed by the openssl object table.

use const_oid::ObjectIdentifier;
use openssl::asn1::Asn1Object;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::x509::X509Ref;

fn object(oid: &ObjectIdentifier) -> Result<Asn1Object, ErrorStack> {
    Asn1Object::from_str(&oid.to_string())
}

/// Human readable name of an algorithm, falling back to the dotted OID.
pub(crate) fn name(oid: &ObjectIdentifier) -> String {
    object(oid)
        .map(|obj| obj.to_string())
        .unwrap_or_else(|_| oid.to_string())
}

/// Hash function named by a CertID hash algorithm.
pub(crate) fn digest(oid: &ObjectIdentifier) -> Option<MessageDigest> {
    object(oid)
        .ok()
        .and_then(|obj| MessageDigest::from_nid(obj.nid()))
}

/// Digest to feed a verifier for the given signature algorithm.
///
/// `Ok(None)` means the algorithm signs the message directly (EdDSA).
pub(crate) fn signature_digest(oid: &ObjectIdentifier) -> Result<Option<MessageDigest>, String> {
    let unsupported = || format!("unsupported signature algorithm {}", name(oid));
    let obj = object(oid).map_err(|_| unsupported())?;
    let algorithms = obj.nid().signature_algorithms().ok_or_else(unsupported)?;
    if algorithms.digest == Nid::UNDEF {
        if algorithms.pkey == Nid::from_raw(Id::ED25519.as_raw())
            || algorithms.pkey == Nid::from_raw(Id::ED448.as_raw()) {
            return Ok(None);
        }
        return Err(unsupported());
    }
    MessageDigest::from_nid(algorithms.digest)
        .map(Some)
        .ok_or_else(unsupported)
}

/// Signature algorithm a certificate was signed with.
pub fn certificate_algorithm(cert: &X509Ref) -> String {
    cert.signature_algorithm().object().to_string()
}
