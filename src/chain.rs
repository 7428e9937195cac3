//! Handshake inputs and leaf/issuer extraction.

use crate::error::ErrorKind;
use openssl::ssl::SslRef;
use openssl::x509::{X509Ref, X509};

/// Number of certificates needed to check a staple: the leaf and its issuer.
pub const REQUIRED_CHAIN_LEN: usize = 2;

/// The parts of a completed TLS handshake that staple validation reads.
#[derive(Clone, Default)]
pub struct HandshakeState {
    /// Verified chains, leaf first. Only the first chain is consulted.
    pub verified_chains: Vec<Vec<X509>>,
    /// Stapled OCSP response bytes as sent by the server. Empty when absent.
    pub ocsp_response: Vec<u8>,
}

impl HandshakeState {
    /// Builds a state from a single chain and staple.
    pub fn new(chain: Vec<X509>, ocsp_response: Vec<u8>) -> Self {
        HandshakeState {
            verified_chains: vec![chain],
            ocsp_response,
        }
    }

    /// Captures the verified chain and staple of a finished openssl handshake.
    ///
    /// An unverified session yields no chains, which validation reports as
    /// [`ErrorKind::MissingChain`].
    pub fn from_ssl(ssl: &SslRef) -> Self {
        let verified_chains = ssl
            .verified_chain()
            .map(|stack| vec![stack.iter().map(|cert| cert.to_owned()).collect()])
            .unwrap_or_default();
        let ocsp_response = ssl.ocsp_status().map(<[u8]>::to_vec).unwrap_or_default();
        HandshakeState {
            verified_chains,
            ocsp_response,
        }
    }
}

/// Returns the leaf and issuer certificates of the first verified chain.
pub fn extract(state: &HandshakeState) -> Result<(&X509Ref, &X509Ref), ErrorKind> {
    let chain = state
        .verified_chains
        .first()
        .ok_or(ErrorKind::MissingChain)?;
    match chain.as_slice() {
        [leaf, issuer, ..] => Ok((&**leaf, &**issuer)),
        short => Err(ErrorKind::IncompleteChain {
            got: short.len(),
            want: REQUIRED_CHAIN_LEN,
        }),
    }
}
