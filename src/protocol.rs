//! Opening-frame codec and response framing
//!
//! The first message of every session carries the credential, the command
//! and the target. Layout (multi-byte fields big-endian):
//!
//! ```text
//! [0]          version
//! [1..17)      credential
//! [17]         options length L
//! [18..18+L)   options (ignored)
//! [18+L]       command (1 = TCP, 2 = UDP)
//! [19+L..21+L) target port
//! [21+L]       address type (1 = IPv4, 2 = domain, 3 = IPv6)
//! ...          address, then payload to the end of the frame
//! ```

use crate::credential::CredentialOracle;
use crate::error::DropReason;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Minimum length of an opening frame
pub const MIN_FRAME_LEN: usize = 24;

/// Command types
pub const COMMAND_TCP: u8 = 0x01;
pub const COMMAND_UDP: u8 = 0x02;

/// Address types
pub const ADDRESS_TYPE_IPV4: u8 = 0x01;
pub const ADDRESS_TYPE_DOMAIN: u8 = 0x02;
pub const ADDRESS_TYPE_IPV6: u8 = 0x03;

/// Status byte of the response header
pub const RESPONSE_STATUS_OK: u8 = 0x00;

/// Requested transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tcp,
    Udp,
}

impl Command {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            COMMAND_TCP => Some(Command::Tcp),
            COMMAND_UDP => Some(Command::Udp),
            _ => None,
        }
    }

    /// Wire value
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Tcp => COMMAND_TCP,
            Command::Udp => COMMAND_UDP,
        }
    }
}

/// Target address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    /// Host string suitable for dialing
    pub fn host(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{}", ip),
            Address::Domain(name) => f.write_str(name),
            // Uncompressed groups, e.g. 2001:db8:0:0:0:0:0:1
            Address::Ipv6(ip) => {
                let groups: Vec<String> = ip.segments().iter().map(|g| format!("{:x}", g)).collect();
                f.write_str(&groups.join(":"))
            }
        }
    }
}

/// Parsed opening frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCommand {
    /// Protocol version, echoed in the response header
    pub version: u8,

    /// Presented credential
    pub credential: [u8; 16],

    /// Length of the ignored options block
    pub options_len: u8,

    /// Requested transport
    pub command: Command,

    /// Target port
    pub port: u16,

    /// Target address
    pub address: Address,

    /// Offset of the first payload byte within the frame
    pub payload_offset: usize,
}

impl DecodedCommand {
    /// Header prefixed to the first response chunk
    pub fn response_header(&self) -> ResponseHeader {
        ResponseHeader::new(self.version)
    }
}

fn byte_at(frame: &[u8], pos: usize) -> Result<u8, DropReason> {
    frame.get(pos).copied().ok_or(DropReason::Truncated(pos))
}

fn slice_at(frame: &[u8], pos: usize, len: usize) -> Result<&[u8], DropReason> {
    frame.get(pos..pos + len).ok_or(DropReason::Truncated(pos))
}

/// Decode the opening frame of a session.
///
/// Checks run in a fixed order: length, credential, command, address type.
/// Any failure is a `DropReason` and the caller must not respond.
pub fn decode_opening_frame(
    frame: &[u8],
    oracle: &CredentialOracle,
) -> Result<DecodedCommand, DropReason> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(DropReason::TooShort(frame.len()));
    }

    let version = frame[0];
    let mut credential = [0u8; 16];
    credential.copy_from_slice(&frame[1..17]);
    if !oracle.validate(&credential) {
        return Err(DropReason::Unauthorized);
    }

    let options_len = frame[17];
    let mut pos = 18 + options_len as usize;

    let command_byte = byte_at(frame, pos)?;
    let command =
        Command::from_byte(command_byte).ok_or(DropReason::UnsupportedCommand(command_byte))?;
    pos += 1;

    let port_bytes = slice_at(frame, pos, 2)?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    pos += 2;

    let address_type = byte_at(frame, pos)?;
    pos += 1;

    let address = match address_type {
        ADDRESS_TYPE_IPV4 => {
            let octets = slice_at(frame, pos, 4)?;
            pos += 4;
            Address::Ipv4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
        }
        ADDRESS_TYPE_DOMAIN => {
            let len = byte_at(frame, pos)? as usize;
            pos += 1;
            let name = slice_at(frame, pos, len)?;
            pos += len;
            let name = std::str::from_utf8(name).map_err(|_| DropReason::InvalidDomain)?;
            Address::Domain(name.to_string())
        }
        ADDRESS_TYPE_IPV6 => {
            let raw = slice_at(frame, pos, 16)?;
            pos += 16;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            Address::Ipv6(Ipv6Addr::from(octets))
        }
        other => return Err(DropReason::UnsupportedAddressType(other)),
    };

    Ok(DecodedCommand {
        version,
        credential,
        options_len,
        command,
        port,
        address,
        payload_offset: pos,
    })
}

/// Build an opening frame. Used by clients and tests.
pub fn encode_opening_frame(
    version: u8,
    credential: &[u8; 16],
    command: Command,
    port: u16,
    address: &Address,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    frame.push(version);
    frame.extend_from_slice(credential);
    frame.push(0); // no options
    frame.push(command.to_byte());
    frame.extend_from_slice(&port.to_be_bytes());

    match address {
        Address::Ipv4(ip) => {
            frame.push(ADDRESS_TYPE_IPV4);
            frame.extend_from_slice(&ip.octets());
        }
        Address::Domain(name) => {
            frame.push(ADDRESS_TYPE_DOMAIN);
            frame.push(name.len() as u8);
            frame.extend_from_slice(name.as_bytes());
        }
        Address::Ipv6(ip) => {
            frame.push(ADDRESS_TYPE_IPV6);
            frame.extend_from_slice(&ip.octets());
        }
    }

    frame.extend_from_slice(payload);
    frame
}

/// Two-byte header sent before the first response bytes of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader([u8; 2]);

impl ResponseHeader {
    /// Header echoing the request version with an OK status
    pub fn new(version: u8) -> Self {
        ResponseHeader([version, RESPONSE_STATUS_OK])
    }

    pub fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }
}

/// Prefixes the first outbound chunk of a session with the response header
#[derive(Debug)]
pub struct ResponsePrefixer {
    header: Option<ResponseHeader>,
}

impl ResponsePrefixer {
    pub fn new(header: ResponseHeader) -> Self {
        ResponsePrefixer {
            header: Some(header),
        }
    }

    /// Whether the header has already gone out
    pub fn is_sent(&self) -> bool {
        self.header.is_none()
    }

    /// Frame one outbound chunk
    pub fn wrap(&mut self, chunk: &[u8]) -> Vec<u8> {
        match self.header.take() {
            Some(header) => {
                let mut out = Vec::with_capacity(2 + chunk.len());
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(chunk);
                out
            }
            None => chunk.to_vec(),
        }
    }
}
