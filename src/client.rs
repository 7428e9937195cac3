//! TLS client that collects the stapled OCSP response of a server.
//!
//! NATS servers greet clients with a plaintext `INFO` line before the TLS
//! upgrade; targets given with a `nats://` or `tls://` scheme read that line
//! first. Everything else starts the handshake immediately.

use crate::chain::HandshakeState;
use crate::error::CheckError;
use openssl::ssl::{SslConnector, SslFiletype, SslMethod, StatusType};
use std::fmt;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

static TIMEOUT: u64 = 30;
const NATS_PORT: u16 = 4222;
const HTTPS_PORT: u16 = 443;
const MAX_INFO_LEN: usize = 64 * 1024;

/// How the TLS session is started on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TLS from the first byte
    Tls,
    /// NATS: plaintext `INFO` greeting, then TLS
    Nats,
}

/// A server to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Target {
    /// Parses `host`, `host:port` or a URL with a `https`, `tls` or `nats`
    /// scheme.
    pub fn parse(input: &str) -> Result<Target, CheckError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CheckError::InvalidInput {
                field: "host".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };
        let url = Url::parse(&with_scheme).map_err(|e| CheckError::InvalidInput {
            field: "host".to_string(),
            reason: format!("{}: {}", input, e),
        })?;

        let (protocol, default_port) = match url.scheme() {
            "https" => (Protocol::Tls, HTTPS_PORT),
            "tls" | "nats" => (Protocol::Nats, NATS_PORT),
            other => {
                return Err(CheckError::InvalidInput {
                    field: "host".to_string(),
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| CheckError::InvalidInput {
                field: "host".to_string(),
                reason: format!("no hostname in '{}'", input),
            })?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        Ok(Target {
            host,
            port: url.port().unwrap_or(default_port),
            protocol,
        })
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Client side TLS settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// CA bundle to verify the server against instead of the system roots
    pub ca_file: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            ca_file: None,
            client_cert: None,
            client_key: None,
            timeout: Duration::from_secs(TIMEOUT),
        }
    }
}

fn connect_tcp(target: &Target, timeout: Duration) -> Result<TcpStream, CheckError> {
    let address = target.address();
    let socket_addr = address
        .to_socket_addrs()
        .map_err(|source| CheckError::DnsResolution {
            hostname: target.host.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| CheckError::DnsResolution {
            hostname: target.host.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        })?;

    let stream = TcpStream::connect_timeout(&socket_addr, timeout).map_err(|source| {
        CheckError::ConnectionFailed {
            address: address.clone(),
            source,
        }
    })?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

/// Reads the NATS `INFO` greeting, one byte at a time so that nothing past
/// the line is consumed before the TLS upgrade.
fn read_server_info<R: Read>(reader: &mut R) -> Result<String, CheckError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if line.len() >= MAX_INFO_LEN {
            return Err(CheckError::ProtocolError {
                details: "INFO line too long".to_string(),
            });
        }
        if reader.read(&mut byte)? == 0 {
            return Err(CheckError::ProtocolError {
                details: "connection closed before INFO".to_string(),
            });
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
    }
    let text = String::from_utf8_lossy(&line).trim_end().to_string();
    if !text.starts_with("INFO ") {
        return Err(CheckError::ProtocolError { details: text });
    }
    Ok(text)
}

/// Connects to `target`, requests an OCSP staple during the handshake and
/// returns the verified chain and staple.
pub fn fetch_handshake(
    target: &Target,
    options: &ClientOptions,
) -> Result<HandshakeState, CheckError> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    if let Some(ca_file) = &options.ca_file {
        builder.set_ca_file(ca_file)?;
    }
    match (&options.client_cert, &options.client_key) {
        (Some(cert), Some(key)) => {
            builder.set_certificate_chain_file(cert)?;
            builder.set_private_key_file(key, SslFiletype::PEM)?;
            builder.check_private_key()?;
        }
        (None, None) => {}
        _ => {
            return Err(CheckError::InvalidInput {
                field: "client_cert".to_string(),
                reason: "client certificate and key must be given together".to_string(),
            })
        }
    }
    let connector = builder.build();

    let mut stream = connect_tcp(target, options.timeout)?;
    if target.protocol == Protocol::Nats {
        let info = read_server_info(&mut stream)?;
        tracing::debug!(host = %target, info = %info, "server greeting");
    }

    let mut config = connector.configure()?;
    config.set_status_type(StatusType::OCSP)?;
    let tls_stream = config.connect(&target.host, stream)?;
    Ok(HandshakeState::from_ssl(tls_stream.ssl()))
}
