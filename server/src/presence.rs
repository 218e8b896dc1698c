//! Presence notifications: who is connected and what they control
//!
//! The registry publishes a [`PresenceSnapshot`] after every change to the
//! set of connected users or their roles. Snapshots travel over an unbounded
//! channel to a dedicated writer thread that hands them to a
//! [`PresenceSink`], so a slow disk or log backend never stalls the
//! registry's critical section. Because snapshots are enqueued while the
//! registry lock is held, the sink sees them in commit order.
//!
//! Two sinks exist, matching the two ways the server is deployed:
//! - [`LogPresenceSink`] emits one structured line per change on the
//!   `presence` log target.
//! - [`FilePresenceSink`] appends `<unix_secs>;<ip:port>:<player>[:<scene>],...`
//!   lines to a status file read by external tooling.

use log::{debug, info, warn};
use pose_shared::SPECTATOR_NAME;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// One connected user as seen by presence consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceEntry {
    pub addr: SocketAddr,
    /// Controlled player name, or the spectator marker
    pub player: String,
    pub scene: Option<String>,
}

impl PresenceEntry {
    pub fn is_spectator(&self) -> bool {
        self.player == SPECTATOR_NAME
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    #[serde(skip)]
    pub taken_at: SystemTime,
    pub users: Vec<PresenceEntry>,
}

impl PresenceSnapshot {
    pub fn new(mut users: Vec<PresenceEntry>) -> Self {
        users.sort_by_key(|entry| entry.addr);
        Self {
            taken_at: SystemTime::now(),
            users,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn unix_secs(&self) -> u64 {
        self.taken_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_secs()
    }
}

/// Consumer of presence snapshots
pub trait PresenceSink: Send {
    fn publish(&mut self, snapshot: &PresenceSnapshot);
}

/// Writes each snapshot as a `USERSTATECHANGE` line on the `presence` target
#[derive(Debug, Default)]
pub struct LogPresenceSink;

impl LogPresenceSink {
    pub fn format(snapshot: &PresenceSnapshot) -> String {
        if snapshot.is_empty() {
            return "USERSTATECHANGE - Empty Server".to_string();
        }

        match serde_json::to_string(snapshot) {
            Ok(json) => format!("USERSTATECHANGE - {}", json),
            Err(e) => format!("USERSTATECHANGE - <unserializable: {}>", e),
        }
    }
}

impl PresenceSink for LogPresenceSink {
    fn publish(&mut self, snapshot: &PresenceSnapshot) {
        info!(target: "presence", "{}", Self::format(snapshot));
    }
}

/// Appends one status line per snapshot to a text file
#[derive(Debug)]
pub struct FilePresenceSink {
    path: PathBuf,
}

impl FilePresenceSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default status file name for a listener port
    pub fn default_path(port: u16) -> PathBuf {
        PathBuf::from(format!("current_players_port{}.txt", port))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(snapshot: &PresenceSnapshot) -> String {
        let users: Vec<String> = snapshot
            .users
            .iter()
            .map(|entry| match &entry.scene {
                Some(scene) => format!("{}:{}:{}", entry.addr, entry.player, scene),
                None => format!("{}:{}", entry.addr, entry.player),
            })
            .collect();

        format!("{};{}", snapshot.unix_secs(), users.join(","))
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl PresenceSink for FilePresenceSink {
    fn publish(&mut self, snapshot: &PresenceSnapshot) {
        let line = Self::format_line(snapshot);
        if let Err(e) = self.append(&line) {
            warn!(
                "Failed to write presence to {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Non-blocking publisher held by the registry
#[derive(Debug, Clone, Default)]
pub struct PresenceHandle {
    tx: Option<mpsc::UnboundedSender<PresenceSnapshot>>,
}

impl PresenceHandle {
    /// A handle that drops every snapshot
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A handle plus the receiving end of its queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PresenceSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn notify(&self, snapshot: PresenceSnapshot) {
        if let Some(tx) = &self.tx {
            if tx.send(snapshot).is_err() {
                debug!("Presence writer is gone, snapshot dropped");
            }
        }
    }
}

/// Starts the writer thread feeding `sink`
///
/// The thread exits once every handle has been dropped.
pub fn spawn_presence_writer(
    mut sink: Box<dyn PresenceSink>,
) -> std::io::Result<(PresenceHandle, thread::JoinHandle<()>)> {
    let (handle, mut rx) = PresenceHandle::channel();

    let join = thread::Builder::new()
        .name("presence".to_string())
        .spawn(move || {
            while let Some(snapshot) = rx.blocking_recv() {
                sink.publish(&snapshot);
            }
            debug!("Presence writer stopped");
        })?;

    Ok((handle, join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn entry(addr: &str, player: &str, scene: Option<&str>) -> PresenceEntry {
        PresenceEntry {
            addr: addr.parse().unwrap(),
            player: player.to_string(),
            scene: scene.map(str::to_string),
        }
    }

    struct Recorder(Arc<Mutex<Vec<PresenceSnapshot>>>);

    impl PresenceSink for Recorder {
        fn publish(&mut self, snapshot: &PresenceSnapshot) {
            self.0.lock().unwrap().push(snapshot.clone());
        }
    }

    #[test]
    fn test_snapshot_is_sorted_by_address() {
        let snapshot = PresenceSnapshot::new(vec![
            entry("10.0.0.2:1", "Bob", None),
            entry("10.0.0.1:1", "Alice", None),
        ]);

        assert_eq!(snapshot.users[0].player, "Alice");
        assert_eq!(snapshot.users[1].player, "Bob");
    }

    #[test]
    fn test_log_format_empty() {
        assert_eq!(
            LogPresenceSink::format(&PresenceSnapshot::empty()),
            "USERSTATECHANGE - Empty Server"
        );
    }

    #[test]
    fn test_log_format_json() {
        let snapshot = PresenceSnapshot::new(vec![entry("127.0.0.1:4000", "Alice", Some("Beach"))]);
        let line = LogPresenceSink::format(&snapshot);

        assert_eq!(
            line,
            r#"USERSTATECHANGE - {"users":[{"addr":"127.0.0.1:4000","player":"Alice","scene":"Beach"}]}"#
        );
    }

    #[test]
    fn test_file_line_format() {
        let mut snapshot = PresenceSnapshot::new(vec![
            entry("127.0.0.1:4000", "Alice", Some("Beach")),
            entry("127.0.0.1:4001", SPECTATOR_NAME, None),
        ]);
        snapshot.taken_at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        assert_eq!(
            FilePresenceSink::format_line(&snapshot),
            "1700000000;127.0.0.1:4000:Alice:Beach,127.0.0.1:4001:@SPECTATOR@"
        );
        assert!(snapshot.users[1].is_spectator());
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!(
            "pose_presence_test_{}.txt",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut sink = FilePresenceSink::new(&path);
        assert_eq!(sink.path(), path.as_path());
        sink.publish(&PresenceSnapshot::empty());
        sink.publish(&PresenceSnapshot::new(vec![entry("127.0.0.1:1", "Alice", None)]));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(';'));
        assert!(lines[1].ends_with(";127.0.0.1:1:Alice"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_default_path() {
        assert_eq!(
            FilePresenceSink::default_path(8888),
            PathBuf::from("current_players_port8888.txt")
        );
    }

    #[test]
    fn test_disabled_handle_drops_snapshots() {
        let handle = PresenceHandle::disabled();
        handle.notify(PresenceSnapshot::empty());
    }

    #[test]
    fn test_channel_handle_delivers_in_order() {
        let (handle, mut rx) = PresenceHandle::channel();
        handle.notify(PresenceSnapshot::empty());
        handle.notify(PresenceSnapshot::new(vec![entry("127.0.0.1:1", "Alice", None)]));

        assert!(rx.try_recv().unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap().users.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_writer_thread_publishes_and_stops() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, join) = spawn_presence_writer(Box::new(Recorder(Arc::clone(&seen)))).unwrap();

        handle.notify(PresenceSnapshot::empty());
        handle.notify(PresenceSnapshot::new(vec![entry("127.0.0.1:1", "Alice", None)]));
        drop(handle);

        join.join().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].users[0].player, "Alice");
    }
}
