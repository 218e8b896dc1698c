//! Source address admission for incoming connections

use log::warn;
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Decides whether a connection from `ip` may proceed
///
/// Evaluated once per accepted connection, before the connection touches the
/// registry. The server calls it on the blocking thread pool, so
/// implementations may do file or other blocking I/O.
pub trait Admission: Send + Sync {
    fn is_allowed(&self, ip: IpAddr) -> bool;
}

/// Admits every address
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Admission for AllowAll {
    fn is_allowed(&self, _ip: IpAddr) -> bool {
        true
    }
}

/// Allowlist file re-read on every check
///
/// Each line starts with an IP address followed by whitespace and one more
/// token, which is ignored. Lines that do not start with a valid address are
/// skipped. A missing or unreadable file admits nobody.
#[derive(Debug, Clone)]
pub struct FileAllowlist {
    path: PathBuf,
}

impl FileAllowlist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the current set of allowed addresses
    pub fn load(&self) -> std::io::Result<HashSet<IpAddr>> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(parse_allowlist(&contents))
    }
}

impl Admission for FileAllowlist {
    fn is_allowed(&self, ip: IpAddr) -> bool {
        match self.load() {
            Ok(allowed) => allowed.contains(&ip),
            Err(e) => {
                warn!(
                    "Cannot read allowlist {}: {}, rejecting {}",
                    self.path.display(),
                    e,
                    ip
                );
                false
            }
        }
    }
}

fn parse_allowlist(contents: &str) -> HashSet<IpAddr> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "pose_allowlist_{}_{}.txt",
            name,
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.is_allowed(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn test_parse_allowlist() {
        let allowed = parse_allowlist(
            "10.0.0.1 1718000000\n\n  10.0.0.2   1718000001\nnot-an-ip 5\n::1 7\n",
        );

        assert_eq!(allowed.len(), 3);
        assert!(allowed.contains(&"10.0.0.1".parse::<IpAddr>().unwrap()));
        assert!(allowed.contains(&"10.0.0.2".parse::<IpAddr>().unwrap()));
        assert!(allowed.contains(&"::1".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_file_allowlist_is_reloaded() {
        let path = temp_file("reload", "127.0.0.1 1\n");
        let allowlist = FileAllowlist::new(&path);
        let local: IpAddr = "127.0.0.1".parse().unwrap();
        let other: IpAddr = "192.168.1.20".parse().unwrap();

        assert!(allowlist.is_allowed(local));
        assert!(!allowlist.is_allowed(other));

        fs::write(&path, "192.168.1.20 2\n").unwrap();
        assert!(!allowlist.is_allowed(local));
        assert!(allowlist.is_allowed(other));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_rejects() {
        let allowlist = FileAllowlist::new("/nonexistent/pose/allowlist.txt");
        assert_eq!(allowlist.path(), Path::new("/nonexistent/pose/allowlist.txt"));
        assert!(!allowlist.is_allowed("127.0.0.1".parse().unwrap()));
    }
}
