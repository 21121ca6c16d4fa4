//! Egress strategies and the dispatcher that tries them in order

use crate::error::{DialError, DropReason};
use crate::socks5::{self, Socks5Endpoint};
use log::{debug, trace, warn};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Default connect timeout for a single strategy
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Query keys that name a strategy in `mode=auto`
const KEY_DIRECT: &str = "direct";
const KEY_SOCKS5: &str = "s5";
const KEY_PROXY_IP: &str = "proxyip";

/// Split `host[:port]` or `[v6]:port`. The port part is returned unparsed.
pub(crate) fn split_host_port(value: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = value.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail.strip_prefix(':') {
            Some(port) => Some((host, Some(port))),
            None if tail.is_empty() => Some((host, None)),
            None => None,
        };
    }

    Some(match value.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (value, None),
    })
}

/// Fixed forwarding host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub host: String,

    /// Port override; `None` keeps the decoded target port
    pub port: Option<u16>,
}

impl ProxyTarget {
    /// Parse `host[:port]`. A zero or non-numeric port means "no override".
    pub fn parse(value: &str) -> Option<Self> {
        let (host, port) = split_host_port(value.trim())?;
        if host.is_empty() {
            return None;
        }

        Some(ProxyTarget {
            host: host.to_string(),
            port: port.and_then(|p| p.parse::<u16>().ok()).filter(|p| *p != 0),
        })
    }

    /// Port to dial for a given decoded target port
    pub fn port_for(&self, target_port: u16) -> u16 {
        self.port.unwrap_or(target_port)
    }
}

/// One way of reaching the final target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressStrategy {
    /// Dial the decoded target
    Direct,

    /// Relay through an upstream SOCKS5 proxy
    Socks5(Socks5Endpoint),

    /// Dial a fixed forwarding host instead of the target
    FixedProxy(ProxyTarget),
}

impl fmt::Display for EgressStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EgressStrategy::Direct => f.write_str("direct"),
            EgressStrategy::Socks5(ep) => write!(f, "s5({}:{})", ep.host, ep.port),
            EgressStrategy::FixedProxy(target) => match target.port {
                Some(port) => write!(f, "proxy({}:{})", target.host, port),
                None => write!(f, "proxy({})", target.host),
            },
        }
    }
}

/// Strategy selector given by the `mode` query parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Order follows the query-string keys
    Auto,
    Direct,
    Socks5,
    /// Direct first, then the fixed forwarding host
    Proxy,
    /// Unrecognised mode; selects nothing
    Other(String),
}

impl Mode {
    pub fn parse(value: &str) -> Self {
        match value {
            "auto" => Mode::Auto,
            "direct" => Mode::Direct,
            "s5" => Mode::Socks5,
            "proxy" => Mode::Proxy,
            other => Mode::Other(other.to_string()),
        }
    }
}

/// Strategy kinds before their parameters are attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyKind {
    Direct,
    Socks5,
    FixedProxy,
}

/// Egress parameters carried by an upgrade request
#[derive(Debug, Clone)]
pub struct UpgradeParams {
    pub mode: Mode,

    /// Raw query string (without `?`), used for the `auto` order
    pub raw_query: String,

    /// SOCKS5 endpoint from `s5` or the path
    pub socks5: Option<Socks5Endpoint>,

    /// Fixed forwarding host from `proxyip`
    pub proxy: Option<ProxyTarget>,
}

impl UpgradeParams {
    /// Extract parameters from the upgrade request URL.
    ///
    /// An encoded `?` in the path (`%3F`) is decoded and the remainder is
    /// used as the query string.
    pub fn from_url(url: &Url) -> Self {
        let mut path = url.path().to_string();
        let mut raw_query = url.query().unwrap_or("").to_string();

        if path.contains("%3F") || path.contains("%3f") {
            let decoded = percent_decode_str(&path).decode_utf8_lossy().into_owned();
            if let Some((p, q)) = decoded.split_once('?') {
                path = p.to_string();
                raw_query = q.to_string();
            }
        }

        let params: Vec<(String, String)> = url::form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let mode = get("mode")
            .filter(|m| !m.is_empty())
            .map(|m| Mode::parse(&m))
            .unwrap_or(Mode::Auto);

        let socks5_spec = match get(KEY_SOCKS5).filter(|s| !s.is_empty()) {
            Some(spec) => spec,
            None => {
                let path = path.strip_prefix('/').unwrap_or(&path);
                percent_decode_str(path).decode_utf8_lossy().into_owned()
            }
        };

        UpgradeParams {
            mode,
            raw_query,
            socks5: Socks5Endpoint::parse(&socks5_spec),
            proxy: get(KEY_PROXY_IP).and_then(|p| ProxyTarget::parse(&p)),
        }
    }

    /// Fill in missing parameters from server-wide defaults
    pub fn with_defaults(
        mut self,
        socks5: Option<&Socks5Endpoint>,
        proxy: Option<&ProxyTarget>,
    ) -> Self {
        if self.socks5.is_none() {
            self.socks5 = socks5.cloned();
        }
        if self.proxy.is_none() {
            self.proxy = proxy.cloned();
        }
        self
    }

    fn order(&self) -> Vec<StrategyKind> {
        match &self.mode {
            Mode::Proxy => vec![StrategyKind::Direct, StrategyKind::FixedProxy],
            Mode::Direct => vec![StrategyKind::Direct],
            Mode::Socks5 => vec![StrategyKind::Socks5],
            Mode::Other(_) => Vec::new(),
            Mode::Auto => {
                let order: Vec<StrategyKind> = self
                    .raw_query
                    .split('&')
                    .filter_map(|pair| match pair.split('=').next() {
                        Some(KEY_DIRECT) => Some(StrategyKind::Direct),
                        Some(KEY_SOCKS5) => Some(StrategyKind::Socks5),
                        Some(KEY_PROXY_IP) => Some(StrategyKind::FixedProxy),
                        _ => None,
                    })
                    .collect();

                if order.is_empty() {
                    vec![StrategyKind::Direct]
                } else {
                    order
                }
            }
        }
    }

    /// Ordered strategies for this session.
    ///
    /// Strategies whose parameters are missing are skipped.
    pub fn strategies(&self) -> Vec<EgressStrategy> {
        self.order()
            .into_iter()
            .filter_map(|kind| match kind {
                StrategyKind::Direct => Some(EgressStrategy::Direct),
                StrategyKind::Socks5 => self.socks5.clone().map(EgressStrategy::Socks5),
                StrategyKind::FixedProxy => self.proxy.clone().map(EgressStrategy::FixedProxy),
            })
            .collect()
    }
}

/// Tries egress strategies until one connects
#[derive(Debug, Clone)]
pub struct EgressDispatcher {
    connect_timeout: Duration,
}

impl EgressDispatcher {
    pub fn new(connect_timeout: Duration) -> Self {
        EgressDispatcher { connect_timeout }
    }

    /// Connect to `host:port` with the first strategy that succeeds
    pub async fn connect(
        &self,
        strategies: &[EgressStrategy],
        host: &str,
        port: u16,
    ) -> Result<TcpStream, DropReason> {
        for strategy in strategies {
            match self.attempt(strategy, host, port).await {
                Ok(stream) => {
                    debug!("Connected to {}:{} via {}", host, port, strategy);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Strategy {} failed for {}:{}: {}", strategy, host, port, e);
                }
            }
        }

        warn!(
            "No egress strategy reached {}:{} (tried {})",
            host,
            port,
            strategies.len()
        );
        Err(DropReason::EgressExhausted(format!("{}:{}", host, port)))
    }

    /// Run one strategy under the connect timeout
    pub async fn attempt(
        &self,
        strategy: &EgressStrategy,
        host: &str,
        port: u16,
    ) -> Result<TcpStream, DialError> {
        trace!("Trying {} for {}:{}", strategy, host, port);

        match timeout(self.connect_timeout, dial_strategy(strategy, host, port)).await {
            Ok(result) => result,
            Err(_) => Err(DialError::Timeout(self.connect_timeout)),
        }
    }
}

async fn dial_strategy(
    strategy: &EgressStrategy,
    host: &str,
    port: u16,
) -> Result<TcpStream, DialError> {
    let stream = match strategy {
        EgressStrategy::Direct => TcpStream::connect((host, port)).await?,
        EgressStrategy::Socks5(endpoint) => socks5::dial(endpoint, host, port).await?,
        EgressStrategy::FixedProxy(target) => {
            TcpStream::connect((target.host.as_str(), target.port_for(port))).await?
        }
    };
    Ok(stream)
}

impl Default for EgressDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}
