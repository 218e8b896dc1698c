//! Wire protocol shared by the pose relay server and its clients.
//!
//! The protocol is a plain byte stream over TCP. Every application message
//! ends with [`FRAME_TERMINATOR`]; inside a message, records are separated by
//! [`FIELD_SEPARATOR`] and the fields of a record by [`RECORD_SEPARATOR`].
//! Pose payloads are opaque to the server and are relayed verbatim.
//!
//! - [`framing`] turns an arbitrarily fragmented stream into complete messages.
//! - [`message`] classifies a message as handshake, spectator poll or pose update.
//! - [`response`] builds the byte strings sent in either direction.

use std::time::Duration;

pub mod framing;
pub mod message;
pub mod response;

pub use framing::{encode_frame, FrameDecoder, FrameError};
pub use message::{
    parse_request, HandshakeError, ParseError, PoseUpdate, ProtocolVersion, Request, TargetUpdate,
};
pub use response::{
    encode_handshake, encode_records, encode_update, handshake_ack, handshake_error,
    parse_records, Record,
};

/// Terminates every application message, including the last one sent.
pub const FRAME_TERMINATOR: u8 = b'|';
/// Separates the player name and the per-target records of a pose update.
pub const FIELD_SEPARATOR: u8 = b';';
/// Separates the fields of a single record.
pub const RECORD_SEPARATOR: u8 = b',';

/// Bytes a connection may buffer without seeing a terminator.
pub const MAX_PARTIAL_FRAME: usize = 20_000;

/// Prefix identifying a handshake frame.
pub const HANDSHAKE_MAGIC: &[u8] = b"INITFRAME";
/// Protocol version this build speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// Request body that switches a connection to spectator mode.
pub const SPECTATOR_REQUEST: &[u8] = b"S";
/// Player name reported for spectators in presence output.
pub const SPECTATOR_NAME: &str = "@SPECTATOR@";

/// Target carrying clothing state, delivered at most once per [`CLOTHES_INTERVAL`].
pub const CLOTHES_TARGET: &[u8] = b"CLOTHES";
pub const CLOTHES_INTERVAL: Duration = Duration::from_secs(2);

/// Response body when no other player has any state to report.
pub const NONE_RESPONSE: &[u8] = b"none|";

/// Maximum number of controlled (non-spectator) players.
pub const PLAYER_LIMIT: usize = 8;
/// Maximum number of connected users, players and spectators together.
pub const USERS_LIMIT: usize = 10;

pub const DEFAULT_PORT: u16 = 8888;
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
