//! # Pose Relay Client Library
//!
//! A headless client for the pose relay server. It speaks the same wire
//! protocol as the avatar applications that normally connect to the relay,
//! without any rendering or tracking hardware, which makes it useful for
//! smoke tests, load tests and the workspace integration tests.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Manages the TCP connection to the relay:
//! - Handshake with protocol version and scene name
//! - Pose updates and spectator polls
//! - Reassembly of `|`-terminated replies
//!
//! ### Pose Module (`pose`)
//! Generates a synthetic avatar pose:
//! - Named targets with position and rotation payloads
//! - Small random jitter per frame so consecutive updates differ
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use pose_client::network::PoseClient;
//! use pose_client::pose::PoseGenerator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = PoseClient::connect("127.0.0.1:8888").await?;
//!     let reply = client.handshake("Beach").await?;
//!     println!("{}", reply.text);
//!
//!     let mut pose = PoseGenerator::new();
//!     let others = client.send_update("Alice", &pose.next_frame()).await?;
//!     println!("{} records from other players", others.len());
//!
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod pose;

pub use network::{ClientError, HandshakeReply, PoseClient};
pub use pose::PoseGenerator;
