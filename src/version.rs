//! Version information for wsgate

/// Current version of wsgate
pub const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Platform the binary runs on (os/arch)
pub fn platform() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}
