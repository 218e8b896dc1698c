//! Classification of decoded messages into typed requests

use crate::{FIELD_SEPARATOR, HANDSHAKE_MAGIC, PROTOCOL_VERSION, RECORD_SEPARATOR, SPECTATOR_REQUEST};
use std::fmt;
use thiserror::Error;

/// Three-part protocol version carried by the handshake frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.major, self.minor, self.patch]
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Handshake failures reported back to the client as text
///
/// The `Display` text is exactly what goes on the wire, before the terminator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Version mismatch. Please update your client.")]
    VersionMismatch { client: ProtocolVersion },
    #[error("Invalid scene name encoding")]
    InvalidEncoding,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed message with {fields} field(s)")]
    Malformed { fields: usize },
    #[error("pose update without a player name")]
    EmptyPlayerName,
}

/// New state for one target of a player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUpdate {
    pub name: Vec<u8>,
    /// Everything after the first record separator, never interpreted
    pub payload: Vec<u8>,
}

/// Batch of target states published by the player a connection controls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseUpdate {
    pub player: Vec<u8>,
    pub targets: Vec<TargetUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Version check and scene announcement; carries the scene name or the
    /// error to report
    Handshake(Result<String, HandshakeError>),
    /// Switch to (or stay in) receive-only mode and poll everyone's state
    Spectate,
    Update(PoseUpdate),
}

/// Classifies one message with its terminator already stripped
pub fn parse_request(message: &[u8]) -> Result<Request, ParseError> {
    if let Some(handshake) = parse_handshake(message) {
        return Ok(Request::Handshake(handshake));
    }

    let fields: Vec<&[u8]> = message.split(|&b| b == FIELD_SEPARATOR).collect();

    if fields.len() > 2 {
        let player = fields[0];
        if player.is_empty() {
            return Err(ParseError::EmptyPlayerName);
        }

        let targets = fields[1..]
            .iter()
            .filter(|record| !record.is_empty())
            .map(|record| parse_target(record))
            .collect();

        return Ok(Request::Update(PoseUpdate {
            player: player.to_vec(),
            targets,
        }));
    }

    if message == SPECTATOR_REQUEST {
        return Ok(Request::Spectate);
    }

    Err(ParseError::Malformed {
        fields: fields.len(),
    })
}

/// Returns `None` when the message is not a handshake frame at all
fn parse_handshake(message: &[u8]) -> Option<Result<String, HandshakeError>> {
    let header_len = HANDSHAKE_MAGIC.len() + 3;
    if message.len() < header_len || !message.starts_with(HANDSHAKE_MAGIC) {
        return None;
    }

    let version = &message[HANDSHAKE_MAGIC.len()..header_len];
    let client = ProtocolVersion::new(version[0], version[1], version[2]);
    if client != PROTOCOL_VERSION {
        return Some(Err(HandshakeError::VersionMismatch { client }));
    }

    let scene = match std::str::from_utf8(&message[header_len..]) {
        Ok(text) => text,
        Err(_) => return Some(Err(HandshakeError::InvalidEncoding)),
    };

    let scene = scene
        .split(FIELD_SEPARATOR as char)
        .next()
        .unwrap_or_default();

    Some(Ok(scene.to_string()))
}

fn parse_target(record: &[u8]) -> TargetUpdate {
    let mut parts = record.splitn(2, |&b| b == RECORD_SEPARATOR);
    let name = parts.next().unwrap_or_default();
    let payload = parts.next().unwrap_or_default();

    TargetUpdate {
        name: name.to_vec(),
        payload: payload.to_vec(),
    }
}
