//! JSON configuration file

use crate::error::GatewayError;
use crate::server::ServerOption;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Gateway settings loaded from a JSON file. Every field is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub buffer_size: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
    pub doh_url: Option<String>,
    pub doh_timeout_secs: Option<u64>,
    pub masquerade_host: Option<String>,
    pub credential_path: Option<String>,
    pub uuid: Option<String>,
    pub upstream_proxy: Option<String>,
    pub proxy_ip: Option<String>,
}

impl FileConfig {
    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse config JSON
    pub fn from_json(text: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Overlay the values present in the file onto `options`
    pub fn apply(self, mut options: ServerOption) -> ServerOption {
        if let Some(host) = self.listen_host {
            options = options.with_listen_host(host);
        }
        if let Some(port) = self.listen_port {
            options = options.with_listen_port(port);
        }
        if let Some(size) = self.buffer_size {
            options = options.with_buffer_size(size);
        }
        if let Some(secs) = self.connect_timeout_secs {
            options = options.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(url) = self.doh_url {
            options = options.with_doh_url(url);
        }
        if let Some(secs) = self.doh_timeout_secs {
            options = options.with_doh_timeout(Duration::from_secs(secs));
        }
        if let Some(host) = self.masquerade_host {
            options = options.with_masquerade_host(host);
        }
        if let Some(path) = self.credential_path {
            options = options.with_credential_path(path);
        }
        if let Some(uuid) = self.uuid {
            options = options.with_fixed_credential(uuid);
        }
        if let Some(proxy) = self.upstream_proxy {
            options = options.with_upstream_proxy(proxy);
        }
        if let Some(proxy_ip) = self.proxy_ip {
            options = options.with_proxy_ip(proxy_ip);
        }
        options
    }
}
