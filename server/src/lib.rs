//! # Pose Relay Server Library
//!
//! This library provides the relay server that lets several avatar clients
//! share one virtual scene. Every client streams the pose of the player it
//! controls (a set of named targets, each with an opaque payload) and gets
//! back the latest pose of every other player in the same reply.
//!
//! ## Core Responsibilities
//!
//! ### Player Ownership
//! A player name is controlled by at most one connection at a time. The first
//! connection to send an update for a name claims it; any other connection
//! that tries to update the same name is disconnected. Switching to another
//! name, spectating or disconnecting releases the previous player together
//! with all of its state.
//!
//! ### Request/Response Fan-out
//! The server never pushes data on its own. Each pose update or spectator
//! poll is answered with the stored targets of every other player, so a
//! client's receive rate follows its own send rate. Clothes state is large
//! and rarely changes, so it is sent to each user at most once per throttle
//! interval.
//!
//! ### Connection Lifecycle
//! Handles the complete lifecycle of a TCP connection:
//! - Admission by source address (optional allowlist file)
//! - Global cap on concurrent connections
//! - Framing, parsing and dispatch of `|`-terminated messages
//! - Idle timeout, framing overflow and policy violations
//! - Release of every registry entry owned by the connection
//!
//! ### Presence Notification
//! Every change to the set of connected users or their roles produces a
//! presence snapshot that is handed to a sink on a separate thread, either
//! as a structured log line or as a line in a status file.
//!
//! ## Architecture Design
//!
//! ### One Task Per Connection
//! The listener spawns one tokio task per accepted connection. Tasks share a
//! single [`registry::Registry`] behind an async mutex; each request is
//! handled entirely inside one critical section and the lock is released
//! before the reply is written to the socket.
//!
//! ### Wire Protocol
//! The byte-level protocol (framing, message grammar, response encoding)
//! lives in the `pose-shared` crate so the headless client speaks exactly
//! the same dialect.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Users, players, player ownership and per-user metadata, with the state
//! transitions that keep them consistent.
//!
//! ### Fan-out Module (`fanout`)
//! Applying an update and assembling the response for the requesting user.
//!
//! ### Network Module (`network`)
//! TCP listener, per-connection loop and request dispatch.
//!
//! ### Presence Module (`presence`)
//! Snapshot type, sinks and the writer thread.
//!
//! ### Admission Module (`admission`)
//! Source address allowlist.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use pose_server::admission::AllowAll;
//! use pose_server::network::{Server, ServerConfig};
//! use pose_server::presence::{spawn_presence_writer, LogPresenceSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (presence, _writer) = spawn_presence_writer(Box::new(LogPresenceSink))?;
//!
//!     // Listens on 0.0.0.0:8888 with the default limits
//!     let server = Server::bind(ServerConfig::default(), Arc::new(AllowAll), presence).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod error;
pub mod fanout;
pub mod network;
pub mod presence;
pub mod registry;
