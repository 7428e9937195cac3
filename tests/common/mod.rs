//! Test PKI, OCSP response fixtures and a loopback TLS server.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use const_oid::db::rfc5912::{ECDSA_WITH_SHA_256, ID_SHA_1, SHA_256_WITH_RSA_ENCRYPTION};
use der::asn1::{Any, AnyRef, BitString, GeneralizedTime, Null, OctetString};
use der::{Decode, Encode, Header, Reader, SliceReader, Tag};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use staplechecker::HandshakeState;
use std::io::Write;
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use x509_cert::ext::pkix::crl::CrlReason;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;
use x509_ocsp::{
    BasicOcspResponse, CertId, CertStatus, OcspGeneralizedTime, OcspResponse, ResponderId,
    ResponseData, RevokedInfo, SingleResponse, Version,
};

pub const LEAF_SERIAL: u32 = 0x1001;

// PKI

pub struct Identity {
    pub key: PKey<Private>,
    pub cert: X509,
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub struct CertSpec<'a> {
    pub serial: u32,
    pub common_name: &'a str,
    pub ca: bool,
    pub ocsp_signing: bool,
    /// Adds a 127.0.0.1 subject alternative name
    pub loopback: bool,
}

/// Builds a certificate for `key`. Without an issuer it is self-signed.
pub fn certificate(
    spec: CertSpec<'_>,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", spec.common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(spec.serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some((issuer_cert, _)) => builder.set_issuer_name(issuer_cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(key).unwrap();
    let not_before = openssl::asn1::Asn1Time::days_from_now(0).unwrap();
    let not_after = openssl::asn1::Asn1Time::days_from_now(365).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
    if spec.ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
    }
    if spec.ocsp_signing {
        builder
            .append_extension(ExtendedKeyUsage::new().other("OCSPSigning").build().unwrap())
            .unwrap();
    }
    if spec.loopback {
        let san = SubjectAlternativeName::new()
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(issuer.map(|(cert, _)| &**cert), None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }
    let signing_key = issuer.map(|(_, issuer_key)| issuer_key).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub struct Pki {
    pub ca: Identity,
    pub leaf: Identity,
    pub responder: Identity,
}

impl Pki {
    pub fn new() -> Pki {
        Pki::with_ca_key(ec_key())
    }

    pub fn with_ca_key(ca_key: PKey<Private>) -> Pki {
        let ca_cert = certificate(
            CertSpec {
                serial: 1,
                common_name: "Staple Test CA",
                ca: true,
                ocsp_signing: false,
                loopback: false,
            },
            &ca_key,
            None,
        );
        let leaf_key = ec_key();
        let leaf_cert = certificate(
            CertSpec {
                serial: LEAF_SERIAL,
                common_name: "leaf.staple.test",
                ca: false,
                ocsp_signing: false,
                loopback: true,
            },
            &leaf_key,
            Some((&ca_cert, &ca_key)),
        );
        let responder_key = ec_key();
        let responder_cert = certificate(
            CertSpec {
                serial: 0x2001,
                common_name: "Staple Test OCSP Responder",
                ca: false,
                ocsp_signing: true,
                loopback: false,
            },
            &responder_key,
            Some((&ca_cert, &ca_key)),
        );
        Pki {
            ca: Identity {
                key: ca_key,
                cert: ca_cert,
            },
            leaf: Identity {
                key: leaf_key,
                cert: leaf_cert,
            },
            responder: Identity {
                key: responder_key,
                cert: responder_cert,
            },
        }
    }

    /// Handshake presenting `[leaf, ca]` and the given staple.
    pub fn handshake(&self, staple: Vec<u8>) -> HandshakeState {
        HandshakeState::new(vec![self.leaf.cert.clone(), self.ca.cert.clone()], staple)
    }

    pub fn staple(&self) -> StapleBuilder {
        StapleBuilder::new(&self.ca.cert)
    }
}

// OCSP responses

fn parsed(cert: &X509) -> Certificate {
    Certificate::from_der(&cert.to_der().unwrap()).unwrap()
}

fn sha1(data: &[u8]) -> OctetString {
    OctetString::new(hash(MessageDigest::sha1(), data).unwrap().to_vec()).unwrap()
}

fn ocsp_time(time: DateTime<Utc>) -> OcspGeneralizedTime {
    let since_epoch = Duration::from_secs(time.timestamp() as u64);
    OcspGeneralizedTime(GeneralizedTime::from_unix_duration(since_epoch).unwrap())
}

/// CertID for `serial` as issued by `issuer`, hashed with SHA-1.
fn cert_id(serial: u32, issuer: &Certificate) -> CertId {
    let key = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    CertId {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: ID_SHA_1,
            parameters: Some(Any::from(Null)),
        },
        issuer_name_hash: sha1(&issuer.tbs_certificate.subject.to_der().unwrap()),
        issuer_key_hash: sha1(key),
        serial_number: SerialNumber::from(serial),
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Status {
    Good,
    Revoked(DateTime<Utc>),
    Unknown,
}

impl Status {
    fn to_ocsp(self) -> CertStatus {
        match self {
            Status::Good => CertStatus::good(),
            Status::Revoked(at) => CertStatus::revoked(RevokedInfo {
                revocation_time: ocsp_time(at),
                revocation_reason: Some(CrlReason::KeyCompromise),
            }),
            Status::Unknown => CertStatus::unknown(),
        }
    }
}

pub fn fixed_time(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, day, hour, 0, 0).unwrap()
}

pub struct StapleBuilder {
    status: Status,
    /// Serial and CertID issuer of each single response, in order
    singles: Vec<(u32, Certificate)>,
    responder_id: ResponderId,
    certs: Vec<Certificate>,
    produced_at: DateTime<Utc>,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
}

impl StapleBuilder {
    /// A good response for the leaf serial, named by and for `issuer`.
    pub fn new(issuer: &X509) -> Self {
        let issuer = parsed(issuer);
        StapleBuilder {
            status: Status::Good,
            responder_id: ResponderId::ByName(issuer.tbs_certificate.subject.clone()),
            singles: vec![(LEAF_SERIAL, issuer)],
            certs: Vec::new(),
            produced_at: fixed_time(10, 12),
            this_update: fixed_time(10, 12),
            next_update: Some(fixed_time(17, 12)),
        }
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Single responses for these serials, in order, keeping the first issuer.
    pub fn serials(mut self, serials: &[u32]) -> Self {
        let issuer = self.singles[0].1.clone();
        self.singles = serials
            .iter()
            .map(|serial| (*serial, issuer.clone()))
            .collect();
        self
    }

    /// CertID hashes of every single response computed from `issuer`.
    pub fn cert_id_issuer(mut self, issuer: &X509) -> Self {
        let issuer = parsed(issuer);
        for single in &mut self.singles {
            single.1 = issuer.clone();
        }
        self
    }

    /// Appends a single response for `serial` issued by `issuer`.
    pub fn push_single(mut self, serial: u32, issuer: &X509) -> Self {
        self.singles.push((serial, parsed(issuer)));
        self
    }

    pub fn responder_by_name(mut self, cert: &X509) -> Self {
        self.responder_id = ResponderId::ByName(parsed(cert).tbs_certificate.subject);
        self
    }

    pub fn responder_by_key(mut self, cert: &X509) -> Self {
        let cert = parsed(cert);
        let key = cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes();
        self.responder_id = ResponderId::ByKey(sha1(key));
        self
    }

    pub fn embed(mut self, cert: &X509) -> Self {
        self.certs.push(parsed(cert));
        self
    }

    pub fn window(
        mut self,
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
    ) -> Self {
        self.produced_at = this_update;
        self.this_update = this_update;
        self.next_update = next_update;
        self
    }

    fn response_data(&self) -> ResponseData {
        let responses = self
            .singles
            .iter()
            .map(|(serial, issuer)| SingleResponse {
                cert_id: cert_id(*serial, issuer),
                cert_status: self.status.to_ocsp(),
                this_update: ocsp_time(self.this_update),
                next_update: self.next_update.map(ocsp_time),
                single_extensions: None,
            })
            .collect();
        ResponseData {
            version: Version::V1,
            responder_id: self.responder_id.clone(),
            produced_at: ocsp_time(self.produced_at),
            responses,
            response_extensions: None,
        }
    }

    /// Encodes the response and signs it with `key`.
    pub fn sign(&self, key: &PKey<Private>) -> Vec<u8> {
        let tbs_response_data = self.response_data();
        let tbs = tbs_response_data.to_der().unwrap();
        let (signature_algorithm, signature) = sign_bytes(&tbs, key);
        let basic = BasicOcspResponse {
            tbs_response_data,
            signature_algorithm,
            signature,
            certs: (!self.certs.is_empty()).then(|| self.certs.clone()),
        };
        OcspResponse::successful(basic).unwrap().to_der().unwrap()
    }

    /// Like [`sign`](Self::sign), but with `producedAt` encoded as the given
    /// GeneralizedTime text, which may carry fractional seconds.
    pub fn sign_with_produced_at(&self, key: &PKey<Private>, produced_at: &str) -> Vec<u8> {
        let data = self.response_data();
        let original = data.produced_at.to_der().unwrap();
        let replacement = AnyRef::new(Tag::GeneralizedTime, produced_at.as_bytes())
            .unwrap()
            .to_der()
            .unwrap();

        // producedAt is the first GeneralizedTime in the ResponseData body
        let content = sequence_content(&data.to_der().unwrap());
        let at = content
            .windows(original.len())
            .position(|window| window == original.as_slice())
            .unwrap();
        let mut body = content[..at].to_vec();
        body.extend_from_slice(&replacement);
        body.extend_from_slice(&content[at + original.len()..]);
        let tbs = sequence(&[body]);

        let (algorithm, signature) = sign_bytes(&tbs, key);
        let basic = sequence(&[tbs, algorithm.to_der().unwrap(), signature.to_der().unwrap()]);
        let bytes = x509_ocsp::ResponseBytes {
            response_type: const_oid::db::rfc6960::ID_PKIX_OCSP_BASIC,
            response: OctetString::new(basic).unwrap(),
        };
        OcspResponse {
            response_status: x509_ocsp::OcspResponseStatus::Successful,
            response_bytes: Some(bytes),
        }
        .to_der()
        .unwrap()
    }
}

fn sign_bytes(tbs: &[u8], key: &PKey<Private>) -> (AlgorithmIdentifierOwned, BitString) {
    let algorithm = if key.id() == Id::RSA {
        AlgorithmIdentifierOwned {
            oid: SHA_256_WITH_RSA_ENCRYPTION,
            parameters: Some(Any::from(Null)),
        }
    } else {
        AlgorithmIdentifierOwned {
            oid: ECDSA_WITH_SHA_256,
            parameters: None,
        }
    };
    let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
    signer.update(tbs).unwrap();
    let signature = BitString::from_bytes(&signer.sign_to_vec().unwrap()).unwrap();
    (algorithm, signature)
}

fn sequence_content(encoded: &[u8]) -> Vec<u8> {
    let mut reader = SliceReader::new(encoded).unwrap();
    let header = Header::decode(&mut reader).unwrap();
    reader.read_slice(header.length).unwrap().to_vec()
}

/// Wraps already encoded elements in a SEQUENCE.
fn sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    let content = parts.concat();
    let mut out = Header::new(Tag::Sequence, content.len())
        .unwrap()
        .to_der()
        .unwrap();
    out.extend_from_slice(&content);
    out
}

/// An OCSP response carrying only the tryLater responder status.
pub fn try_later_response() -> Vec<u8> {
    OcspResponse::try_later().to_der().unwrap()
}

// Loopback server

pub struct Server {
    pub port: u16,
    handle: JoinHandle<()>,
}

impl Server {
    pub fn join(self) {
        self.handle.join().unwrap();
    }
}

/// Serves `connections` TLS handshakes on 127.0.0.1 with the leaf of `pki`,
/// stapling `staple` when given and sending `greeting` before TLS.
pub fn serve(
    pki: &Pki,
    staple: Option<Vec<u8>>,
    greeting: Option<&'static str>,
    connections: usize,
) -> Server {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&pki.leaf.key).unwrap();
    acceptor.set_certificate(&pki.leaf.cert).unwrap();
    acceptor.add_extra_chain_cert(pki.ca.cert.clone()).unwrap();
    acceptor.check_private_key().unwrap();
    if let Some(staple) = staple {
        acceptor
            .set_status_callback(move |ssl| {
                ssl.set_ocsp_status(&staple)?;
                Ok(true)
            })
            .unwrap();
    }
    let acceptor = acceptor.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            let mut stream = stream.unwrap();
            if let Some(greeting) = greeting {
                stream.write_all(greeting.as_bytes()).unwrap();
            }
            if let Ok(mut tls) = acceptor.accept(stream) {
                let _ = tls.shutdown();
            }
        }
    });
    Server { port, handle }
}
