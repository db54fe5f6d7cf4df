use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName};

use crate::config::ClientIpConfig;
use crate::utils::{SecurityError, SecurityResult};

/// Key returned when no source yields an address
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Raw socket peer, inserted into request extensions by transports whose
/// socket peer differs from the connection peer seen by axum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketPeer(pub SocketAddr);

/// How one header is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderProbe {
    /// Comma-separated chain; only the first (client-most) entry is used
    FirstListEntry(HeaderName),
    /// Whole header value
    Value(HeaderName),
}

impl HeaderProbe {
    fn read<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        match self {
            HeaderProbe::FirstListEntry(name) => headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next()),
            HeaderProbe::Value(name) => headers.get(name).and_then(|value| value.to_str().ok()),
        }
    }
}

/// Resolves the canonical client key from request metadata.
///
/// Sources are probed in a fixed order: the configured headers, then the
/// connection peer, then the socket peer. The first candidate that is
/// non-empty after trimming wins. Resolution never fails.
#[derive(Debug, Clone)]
pub struct ClientIdentifier {
    probes: Vec<HeaderProbe>,
}

impl Default for ClientIdentifier {
    fn default() -> Self {
        Self {
            probes: vec![
                HeaderProbe::FirstListEntry(HeaderName::from_static("x-forwarded-for")),
                HeaderProbe::Value(HeaderName::from_static("x-real-ip")),
            ],
        }
    }
}

impl ClientIdentifier {
    /// Identifier reading the given headers in order
    pub fn new(probes: Vec<HeaderProbe>) -> Self {
        Self { probes }
    }

    /// Forwarded-for list first, then the real-ip header, as configured
    pub fn from_config(config: &ClientIpConfig) -> SecurityResult<Self> {
        let header = |name: &str| {
            HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| SecurityError::InvalidRequest(format!("client_ip header {:?}: {}", name, e)))
        };
        Ok(Self::new(vec![
            HeaderProbe::FirstListEntry(header(&config.forwarded_for_header)?),
            HeaderProbe::Value(header(&config.real_ip_header)?),
        ]))
    }

    /// Client key for a request; `"unknown"` when no source yields a value
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        connection_remote: Option<&str>,
        socket_remote: Option<&str>,
    ) -> String {
        self.probes
            .iter()
            .map(|probe| probe.read(headers))
            .chain([connection_remote, socket_remote])
            .flatten()
            .find_map(normalize_address)
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// Canonical form of a client address candidate, or `None` when the candidate
/// is blank.
///
/// Parseable IPs are re-rendered (IPv4-mapped IPv6 collapses to IPv4, ports
/// are dropped); anything else is kept as trimmed text.
pub fn normalize_address(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Some(ip.to_canonical().to_string());
    }
    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return Some(addr.ip().to_canonical().to_string());
    }
    Some(trimmed.to_string())
}
