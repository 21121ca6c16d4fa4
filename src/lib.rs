//! WebSocket to TCP/UDP gateway with rotating credentials

pub mod cli;
pub mod config;
pub mod credential;
pub mod dns;
pub mod egress;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod socks5;
pub mod version;

#[cfg(test)]
mod tests {
    pub mod config_test;
    pub mod credential_test;
    pub mod dns_test;
    pub mod egress_test;
    pub mod frame_test;
    pub mod server_test;
    pub mod session_test;
    pub mod socks5_test;
}

// Re-export commonly used items
pub use crate::cli::CLI;
pub use crate::credential::CredentialOracle;
pub use crate::server::{GatewayServer, ServerOption};
pub use crate::session::Session;
pub use crate::version::VERSION;
