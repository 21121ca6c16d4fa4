//! Error types for wsgate

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why a session was dropped without any response.
///
/// Every variant is handled the same way on the wire: nothing is sent back and
/// the transport is torn down. The variant only matters for logging.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Opening frame shorter than the fixed minimum
    #[error("opening frame too short ({0} bytes)")]
    TooShort(usize),

    /// A length field points past the end of the frame
    #[error("opening frame truncated at offset {0}")]
    Truncated(usize),

    /// Presented credential matches neither the current nor the emergency one
    #[error("credential rejected")]
    Unauthorized,

    /// Command byte is neither TCP nor UDP
    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    /// Address kind is not IPv4, domain or IPv6
    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    /// Domain name is not valid UTF-8
    #[error("invalid domain name")]
    InvalidDomain,

    /// UDP is only relayed to port 53
    #[error("unsupported UDP port {0}")]
    UnsupportedUdpPort(u16),

    /// Every egress strategy failed
    #[error("all egress strategies failed for {0}")]
    EgressExhausted(String),
}

/// Failure of a single egress strategy
#[derive(Debug, Error)]
pub enum DialError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("SOCKS5 error: {0}")]
    Socks5(String),
}

/// Failure of a single DNS-over-HTTPS query
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DoH request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("DNS response too large ({0} bytes)")]
    ResponseTooLarge(usize),
}

/// Startup and serving errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP server error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid credential override: {0}")]
    InvalidCredential(#[from] uuid::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid config file: {0}")]
    ConfigFile(#[from] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
