//! Error types for the relay server

use pose_shared::FrameError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Policy violations that make the server drop a connection
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("player {player} is already controlled by {owner}")]
    PlayerTaken { player: String, owner: SocketAddr },
    #[error("player limit of {limit} reached, cannot add player {player}")]
    PlayerLimit { player: String, limit: usize },
    #[error("user limit of {limit} reached")]
    UserLimit { limit: usize },
}

/// Reasons a connection loop ends other than a clean close by the peer
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
}

pub type Result<T> = std::result::Result<T, RelayError>;
