//! Encoding of responses and client requests

use crate::framing::encode_frame;
use crate::message::{HandshakeError, ProtocolVersion};
use crate::{
    FIELD_SEPARATOR, FRAME_TERMINATOR, HANDSHAKE_MAGIC, NONE_RESPONSE, RECORD_SEPARATOR,
};

const HANDSHAKE_OK: &str = "client_version: OK";
const SCENE_WARNING: &str = "WARNING: You are using a different scene than others on the server.";

/// One `player,target,payload` entry of a fan-out response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub player: Vec<u8>,
    pub target: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Serializes fan-out records into one terminated response
///
/// An empty set encodes as `none|`.
pub fn encode_records<'a, I>(records: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8], &'a [u8])>,
{
    let mut out = Vec::new();

    for (player, target, payload) in records {
        if !out.is_empty() {
            out.push(FIELD_SEPARATOR);
        }
        out.extend_from_slice(player);
        out.push(RECORD_SEPARATOR);
        out.extend_from_slice(target);
        out.push(RECORD_SEPARATOR);
        out.extend_from_slice(payload);
    }

    if out.is_empty() {
        return NONE_RESPONSE.to_vec();
    }

    out.push(FRAME_TERMINATOR);
    out
}

/// Parses a fan-out response body (terminator stripped) back into records
///
/// `none` yields no records. Entries without a target are skipped.
pub fn parse_records(body: &[u8]) -> Vec<Record> {
    if body == &NONE_RESPONSE[..NONE_RESPONSE.len() - 1] {
        return Vec::new();
    }

    body.split(|&b| b == FIELD_SEPARATOR)
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, |&b| b == RECORD_SEPARATOR);
            let player = parts.next()?;
            let target = parts.next()?;
            let payload = parts.next().unwrap_or_default();
            Some(Record {
                player: player.to_vec(),
                target: target.to_vec(),
                payload: payload.to_vec(),
            })
        })
        .collect()
}

/// Successful handshake acknowledgement
///
/// When other connected users announced different scenes, the
/// acknowledgement is prefixed with a warning naming them.
pub fn handshake_ack(other_scenes: &[String]) -> Vec<u8> {
    if other_scenes.is_empty() {
        return encode_frame(HANDSHAKE_OK.as_bytes());
    }

    let text = format!(
        "{}\nOthers are using: {}.\n{}",
        SCENE_WARNING,
        other_scenes.join(", "),
        HANDSHAKE_OK
    );
    encode_frame(text.as_bytes())
}

pub fn handshake_error(err: &HandshakeError) -> Vec<u8> {
    encode_frame(err.to_string().as_bytes())
}

/// Builds the handshake frame a client sends after connecting
pub fn encode_handshake(version: ProtocolVersion, scene: &str) -> Vec<u8> {
    let mut body = HANDSHAKE_MAGIC.to_vec();
    body.extend_from_slice(&version.to_bytes());
    body.extend_from_slice(scene.as_bytes());
    encode_frame(&body)
}

/// Builds a pose update frame for `player`
///
/// Each target is `(name, payload)`; the payload is appended after a record
/// separator.
pub fn encode_update(player: &[u8], targets: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut body = player.to_vec();
    for (name, payload) in targets {
        body.push(FIELD_SEPARATOR);
        body.extend_from_slice(name);
        body.push(RECORD_SEPARATOR);
        body.extend_from_slice(payload);
    }
    encode_frame(&body)
}
