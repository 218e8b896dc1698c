//! TCP connection to the relay server

use log::{debug, info, warn};
use pose_shared::{
    encode_frame, encode_handshake, encode_update, parse_records, FrameDecoder, FrameError,
    ProtocolVersion, Record, PROTOCOL_VERSION, SPECTATOR_REQUEST,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

const HANDSHAKE_OK: &str = "client_version: OK";
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Ceiling on a reply still waiting for its terminator
///
/// Fan-out replies carry every other player's targets and are not bound by
/// the server's request ceiling.
pub const MAX_REPLY_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("server closed the connection")]
    Closed,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Server answer to a handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    /// Full reply text without the terminator
    pub text: String,
}

impl HandshakeReply {
    pub fn is_accepted(&self) -> bool {
        self.text.ends_with(HANDSHAKE_OK)
    }

    /// Scene mismatch warning preceding the acknowledgement, if any
    pub fn warning(&self) -> Option<&str> {
        if !self.is_accepted() {
            return None;
        }
        let warning = self.text[..self.text.len() - HANDSHAKE_OK.len()].trim_end();
        (!warning.is_empty()).then_some(warning)
    }
}

pub struct PoseClient {
    stream: TcpStream,
    server_addr: SocketAddr,
    decoder: FrameDecoder,
    pending: VecDeque<Vec<u8>>,
    reply_timeout: Duration,
}

impl PoseClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let server_addr = stream.peer_addr()?;
        info!("Connected to {}", server_addr);

        Ok(PoseClient {
            stream,
            server_addr,
            decoder: FrameDecoder::with_limit(MAX_REPLY_SIZE),
            pending: VecDeque::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Sets how long `read_frame` waits before giving up
    pub fn set_reply_timeout(&mut self, reply_timeout: Duration) {
        self.reply_timeout = reply_timeout;
    }

    /// Announces the current protocol version and `scene`
    pub async fn handshake(&mut self, scene: &str) -> Result<HandshakeReply> {
        self.handshake_with_version(PROTOCOL_VERSION, scene).await
    }

    pub async fn handshake_with_version(
        &mut self,
        version: ProtocolVersion,
        scene: &str,
    ) -> Result<HandshakeReply> {
        self.send_raw(&encode_handshake(version, scene)).await?;
        let frame = self.read_frame().await?;
        let reply = HandshakeReply {
            text: String::from_utf8_lossy(&frame).into_owned(),
        };

        if !reply.is_accepted() {
            warn!("Handshake refused: {}", reply.text);
        } else if let Some(warning) = reply.warning() {
            warn!("{}", warning);
        }

        Ok(reply)
    }

    /// Sends the pose of `player` and returns the records of every other player
    pub async fn send_update(
        &mut self,
        player: &str,
        targets: &[(String, String)],
    ) -> Result<Vec<Record>> {
        let targets: Vec<(&[u8], &[u8])> = targets
            .iter()
            .map(|(name, payload)| (name.as_bytes(), payload.as_bytes()))
            .collect();

        self.send_raw(&encode_update(player.as_bytes(), &targets))
            .await?;
        let frame = self.read_frame().await?;
        Ok(parse_records(&frame))
    }

    /// Polls the state of every player without controlling one
    pub async fn spectate(&mut self) -> Result<Vec<Record>> {
        self.send_raw(&encode_frame(SPECTATOR_REQUEST)).await?;
        let frame = self.read_frame().await?;
        Ok(parse_records(&frame))
    }

    /// Writes bytes to the server as they are
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("Sending {} bytes to {}", bytes.len(), self.server_addr);
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Next complete reply, without its terminator
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; 8192];

        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let len = timeout(self.reply_timeout, self.stream.read(&mut buf))
                .await
                .map_err(|_| ClientError::Timeout(self.reply_timeout))??;
            if len == 0 {
                return Err(ClientError::Closed);
            }

            self.pending.extend(self.decoder.push(&buf[..len])?);
        }
    }

    /// Waits until the server closes the connection
    ///
    /// Any replies received in the meantime are discarded.
    pub async fn wait_closed(&mut self) -> Result<()> {
        loop {
            match self.read_frame().await {
                Ok(_) => continue,
                Err(ClientError::Closed) => return Ok(()),
                Err(ClientError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            }
        }
    }
}
