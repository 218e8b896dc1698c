//! Shared session registry for the relay server
//!
//! This module tracks every connected user and the player they control:
//! - Users keyed by the remote address of their connection
//! - Players and the latest state of each of their targets
//! - The reverse index from player name to the user that owns it
//! - Per-user metadata (announced scene, last clothes delivery)
//!
//! All four tables are only reachable through `&mut Registry`, which the
//! server keeps behind a single mutex. A player name is present in the
//! ownership index exactly when it is present in the player table, and at
//! most one user owns a given name.

use crate::error::Rejection;
use crate::presence::{PresenceEntry, PresenceHandle, PresenceSnapshot};
use log::info;
use pose_shared::{CLOTHES_INTERVAL, PLAYER_LIMIT, SPECTATOR_NAME, USERS_LIMIT};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Registry shared by all connection tasks
pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Capacity and throttling limits enforced by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of controlled players
    pub players: usize,
    /// Maximum number of registered users, spectators included
    pub users: usize,
    /// Minimum delay between two clothes deliveries to the same user
    pub clothes_interval: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            players: PLAYER_LIMIT,
            users: USERS_LIMIT,
            clothes_interval: CLOTHES_INTERVAL,
        }
    }
}

/// What a registered user is doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Controlling(Vec<u8>),
    Spectating,
}

impl Role {
    /// Name used in logs and presence output
    pub fn display_name(&self) -> String {
        match self {
            Role::Controlling(name) => String::from_utf8_lossy(name).into_owned(),
            Role::Spectating => SPECTATOR_NAME.to_string(),
        }
    }
}

/// Latest state of every target of one player
#[derive(Debug, Default, Clone)]
pub struct Player {
    targets: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Player {
    /// Stores a target's payload, replacing the previous one
    pub fn set_target(&mut self, name: &[u8], payload: &[u8]) {
        match self.targets.get_mut(name) {
            Some(existing) => {
                existing.clear();
                existing.extend_from_slice(payload);
            }
            None => {
                self.targets.insert(name.to_vec(), payload.to_vec());
            }
        }
    }

    pub fn target(&self, name: &[u8]) -> Option<&[u8]> {
        self.targets.get(name).map(Vec::as_slice)
    }

    pub fn targets(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.targets
            .iter()
            .map(|(name, payload)| (name.as_slice(), payload.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Default)]
struct SessionMeta {
    scene: Option<String>,
    last_clothes_sent: Option<Instant>,
}

/// Connected users, their players and the ownership index between them
pub struct Registry {
    users: HashMap<SocketAddr, Role>,
    players: BTreeMap<Vec<u8>, Player>,
    owners: HashMap<Vec<u8>, SocketAddr>,
    sessions: HashMap<SocketAddr, SessionMeta>,
    limits: Limits,
    presence: PresenceHandle,
}

impl Registry {
    pub fn new(limits: Limits, presence: PresenceHandle) -> Self {
        Self {
            users: HashMap::new(),
            players: BTreeMap::new(),
            owners: HashMap::new(),
            sessions: HashMap::new(),
            limits,
            presence,
        }
    }

    /// Wraps the registry for sharing between connection tasks
    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Makes `user` control `player`
    ///
    /// Re-claiming the player the user already controls changes nothing.
    /// Otherwise any previous binding is released and the new one created in
    /// the same step. Fails without touching any table when another user owns
    /// the name or a limit would be exceeded.
    pub fn claim(&mut self, user: SocketAddr, player: &[u8]) -> Result<(), Rejection> {
        if let Some(&owner) = self.owners.get(player) {
            if owner == user {
                return Ok(());
            }
            return Err(Rejection::PlayerTaken {
                player: String::from_utf8_lossy(player).into_owned(),
                owner,
            });
        }

        let previous = self.users.get(&user).cloned();
        if previous.is_none() {
            self.check_user_capacity()?;
        }

        // A player the user gives up frees its slot for the new one
        let held = matches!(previous, Some(Role::Controlling(_))) as usize;
        if self.players.len().saturating_sub(held) >= self.limits.players {
            return Err(Rejection::PlayerLimit {
                player: String::from_utf8_lossy(player).into_owned(),
                limit: self.limits.players,
            });
        }

        if let Some(role) = &previous {
            self.release(user, role);
        }

        self.users.insert(user, Role::Controlling(player.to_vec()));
        self.owners.insert(player.to_vec(), user);
        self.players.entry(player.to_vec()).or_default();
        info!(
            "{} now controls player {}",
            user,
            String::from_utf8_lossy(player)
        );

        self.publish();
        Ok(())
    }

    /// Switches `user` to spectator mode, releasing any controlled player
    pub fn spectate(&mut self, user: SocketAddr) -> Result<(), Rejection> {
        match self.users.get(&user).cloned() {
            Some(Role::Spectating) => return Ok(()),
            Some(role) => self.release(user, &role),
            None => self.check_user_capacity()?,
        }

        self.users.insert(user, Role::Spectating);
        info!("{} is now a SPECTATOR", user);

        self.publish();
        Ok(())
    }

    /// Removes every trace of `user`
    ///
    /// Returns whether the user had registered; only then are presence
    /// consumers notified.
    pub fn disconnect(&mut self, user: SocketAddr) -> bool {
        self.sessions.remove(&user);

        let Some(role) = self.users.remove(&user) else {
            return false;
        };

        self.release(user, &role);
        self.publish();
        true
    }

    /// Remembers the scene announced by `user` in its handshake
    pub fn record_scene(&mut self, user: SocketAddr, scene: String) {
        if scene.is_empty() {
            return;
        }
        self.sessions.entry(user).or_default().scene = Some(scene);
    }

    /// Distinct scenes other users announced that differ from `scene`
    pub fn other_scenes(&self, user: SocketAddr, scene: &str) -> Vec<String> {
        let scenes: BTreeSet<&str> = self
            .sessions
            .iter()
            .filter(|(addr, _)| **addr != user)
            .filter_map(|(_, meta)| meta.scene.as_deref())
            .filter(|other| *other != scene)
            .collect();

        scenes.into_iter().map(str::to_string).collect()
    }

    pub fn scene_of(&self, user: SocketAddr) -> Option<&str> {
        self.sessions.get(&user).and_then(|meta| meta.scene.as_deref())
    }

    pub fn role_of(&self, user: SocketAddr) -> Option<&Role> {
        self.users.get(&user)
    }

    pub fn owner_of(&self, player: &[u8]) -> Option<SocketAddr> {
        self.owners.get(player).copied()
    }

    pub fn player(&self, name: &[u8]) -> Option<&Player> {
        self.players.get(name)
    }

    pub(crate) fn player_mut(&mut self, name: &[u8]) -> Option<&mut Player> {
        self.players.get_mut(name)
    }

    /// Every controlled player with its state, ordered by name
    pub fn players(&self) -> impl Iterator<Item = (&[u8], &Player)> {
        self.players
            .iter()
            .map(|(name, player)| (name.as_slice(), player))
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Whether `user` may receive clothes state again at `now`
    pub fn clothes_due(&self, user: SocketAddr, now: Instant) -> bool {
        match self
            .sessions
            .get(&user)
            .and_then(|meta| meta.last_clothes_sent)
        {
            Some(last) => now.saturating_duration_since(last) >= self.limits.clothes_interval,
            None => true,
        }
    }

    pub fn mark_clothes_sent(&mut self, user: SocketAddr, now: Instant) {
        self.sessions.entry(user).or_default().last_clothes_sent = Some(now);
    }

    /// Current view of connected users for presence consumers
    pub fn snapshot(&self) -> PresenceSnapshot {
        let users = self
            .users
            .iter()
            .map(|(addr, role)| PresenceEntry {
                addr: *addr,
                player: role.display_name(),
                scene: self.scene_of(*addr).map(str::to_string),
            })
            .collect();

        PresenceSnapshot::new(users)
    }

    /// Publishes the current snapshot without any state change
    pub fn announce(&self) {
        self.presence.notify(self.snapshot());
    }

    fn check_user_capacity(&self) -> Result<(), Rejection> {
        if self.users.len() >= self.limits.users {
            return Err(Rejection::UserLimit {
                limit: self.limits.users,
            });
        }
        Ok(())
    }

    fn release(&mut self, user: SocketAddr, role: &Role) {
        match role {
            Role::Controlling(name) => {
                self.players.remove(name);
                self.owners.remove(name);
                info!(
                    "User {} stopped controlling {}",
                    user,
                    String::from_utf8_lossy(name)
                );
            }
            Role::Spectating => {
                info!("User {} is no longer a SPECTATOR", user);
            }
        }
    }

    fn publish(&self) {
        self.presence.notify(self.snapshot());
    }
}
