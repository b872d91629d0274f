//! Gateway-to-server wire protocol.
//!
//! Every datagram begins with a 12-byte header:
//! `{ver=1 (1B), token (2B), type (1B), gateway_EUI (8B big-endian)}`.
//! PUSH_DATA/PULL_RESP bodies are JSON; ACKs carry no body.

pub mod rxpk;
pub mod stat;
pub mod txpk;

use std::fmt;

/// The only protocol version this daemon speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    PushData = 0,
    PushAck = 1,
    PullData = 2,
    PullResp = 3,
    PullAck = 4,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::PushData),
            1 => Some(Self::PushAck),
            2 => Some(Self::PullData),
            3 => Some(Self::PullResp),
            4 => Some(Self::PullAck),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// 64-bit gateway identifier, always sent big-endian in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GatewayEui(pub [u8; 8]);

impl GatewayEui {
    pub fn from_hex(s: &str) -> Option<Self> {
        let clean: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if clean.len() != 16 {
            return None;
        }
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&clean[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl fmt::Display for GatewayEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A parsed 12-byte wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub token: u16,
    pub packet_type: PacketType,
    pub eui: GatewayEui,
}

pub const HEADER_LEN: usize = 12;

/// Build the 12-byte header for an uplink datagram (PUSH_DATA/PULL_DATA).
pub fn build_header(token: u16, packet_type: PacketType, eui: GatewayEui) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0] = PROTOCOL_VERSION;
    buf[1] = (token >> 8) as u8;
    buf[2] = (token & 0xFF) as u8;
    buf[3] = packet_type.as_byte();
    buf[4..12].copy_from_slice(&eui.0);
    buf
}

/// Build the 4-byte ack header (no EUI, no body).
pub fn build_ack(token: u16, packet_type: PacketType) -> [u8; 4] {
    [
        PROTOCOL_VERSION,
        (token >> 8) as u8,
        token as u8,
        packet_type.as_byte(),
    ]
}

/// Parse the leading bytes of a datagram as a header. Datagrams shorter than
/// 4 bytes, with the wrong version, or an unrecognised type are rejected;
/// the EUI is only present (and only parsed) on 12-byte-or-longer frames, as
/// ack datagrams omit it.
pub fn parse_header(buf: &[u8]) -> Option<Header> {
    if buf.len() < 4 || buf[0] != PROTOCOL_VERSION {
        return None;
    }
    let token = u16::from(buf[1]) << 8 | u16::from(buf[2]);
    let packet_type = PacketType::from_byte(buf[3])?;
    let eui = if buf.len() >= HEADER_LEN {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[4..12]);
        GatewayEui(bytes)
    } else {
        GatewayEui([0; 8])
    };
    Some(Header {
        version: buf[0],
        token,
        packet_type,
        eui,
    })
}

/// True iff `buf` is a well-formed ack for `expected_token` of `expected_type`.
/// Per spec §4.5: length >= 4, version 1, matching type, matching token
/// bytes. Anything else (including a shorter/garbled datagram) is ignored.
pub fn is_matching_ack(buf: &[u8], expected_token: u16, expected_type: PacketType) -> bool {
    match parse_header(buf) {
        Some(h) => h.packet_type == expected_type && h.token == expected_token,
        None => false,
    }
}
