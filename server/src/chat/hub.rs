//! Room directory: maps room names to live room actors.
//!
//! The map is a `DashMap`; its shard guards are only held for a lookup,
//! insert or remove and are always released before any `.await`, so a send
//! into a room's queue can never be made while the directory is locked.
//! Rooms are created lazily by `resolve` and retired by `sweep_idle`, where
//! each room decides for itself (inside its own actor) whether it is idle.

use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::chat::room::{RoomError, RoomHandle, RoomReservation};
use crate::config::RoomSettings;
use crate::proto::Envelope;

/// Why a connection was refused before upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Room is full (max {max} users)")]
    Full { max: usize },
    #[error("Room is unavailable, try again")]
    Unavailable,
}

/// Process-wide registry of rooms.
#[derive(Clone)]
pub struct Hub {
    rooms: Arc<DashMap<String, RoomHandle>>,
    settings: Arc<RoomSettings>,
    next_room_id: Arc<AtomicU64>,
}

impl Hub {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            settings: Arc::new(settings),
            next_room_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    /// Return the live room for `name`, creating it if absent.
    ///
    /// The entry lock makes concurrent resolves of a new name agree on one
    /// actor. A handle whose actor has already exited is replaced.
    pub fn resolve(&self, name: &str) -> RoomHandle {
        let (handle, created) = match self.rooms.entry(name.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => (entry.get().clone(), false),
            Entry::Occupied(mut entry) => {
                let handle = self.spawn_room(name);
                let _ = entry.insert(handle.clone());
                (handle, true)
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_room(name);
                let _ = entry.insert(handle.clone());
                (handle, true)
            }
        };

        if created {
            tracing::info!(room = %name, "Created new room");
            let hub = self.clone();
            let room = name.to_string();
            tokio::spawn(async move { hub.announce_room(&room).await });
        }
        handle
    }

    fn spawn_room(&self, name: &str) -> RoomHandle {
        let id = self.next_room_id.fetch_add(1, Ordering::Relaxed);
        RoomHandle::spawn(id, name, self.settings.command_queue_capacity)
    }

    /// Resolve `name` and hold one of its member slots.
    ///
    /// The capacity check and the slot are taken in one step inside the room
    /// actor, so concurrent admissions can never overfill a room.
    pub async fn admit(&self, name: &str) -> Result<RoomReservation, AdmissionError> {
        let max = self.settings.max_clients;
        for _ in 0..2 {
            let handle = self.resolve(name);
            match handle.reserve(max).await {
                Ok(Some(reservation)) => return Ok(reservation),
                Ok(None) => return Err(AdmissionError::Full { max }),
                // Retired between resolve and reserve; the next resolve replaces it.
                Err(RoomError::Closed) => continue,
            }
        }
        Err(AdmissionError::Unavailable)
    }

    /// Current handle for `name`, if the room exists.
    pub fn get(&self, name: &str) -> Option<RoomHandle> {
        self.rooms.get(name).map(|entry| entry.value().clone())
    }

    /// Sorted names of all live rooms.
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn snapshot(&self) -> Vec<RoomHandle> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// Send the current room list to every member of every room.
    pub async fn publish_room_list(&self) {
        let frame = Envelope::room_list(self.room_names()).to_frame();
        for handle in self.snapshot() {
            if handle.broadcast(frame.clone()).await.is_err() {
                tracing::debug!(room = %handle.name(), "Skipped room list for closed room");
            }
        }
    }

    /// Tell existing rooms about a new one, then refresh everyone's room list.
    async fn announce_room(&self, name: &str) {
        let frame = Envelope::room_added(name).to_frame();
        for handle in self.snapshot() {
            if handle.name() != name {
                let _ = handle.broadcast(frame.clone()).await;
            }
        }
        self.publish_room_list().await;
    }

    /// Retire every room idle for longer than the configured timeout and
    /// remove it from the directory. Returns the evicted names.
    pub async fn sweep_idle(&self) -> Vec<String> {
        let idle_timeout = self.settings.idle_timeout;
        let mut evicted = Vec::new();

        for handle in self.snapshot() {
            let retired = match handle.retire_if_idle(idle_timeout).await {
                Ok(retired) => retired,
                Err(RoomError::Closed) => true,
            };
            if !retired {
                continue;
            }
            // Only remove the entry if it still points at the actor that retired.
            let removed = self
                .rooms
                .remove_if(handle.name(), |_, current| current.same_room(&handle))
                .is_some();
            if removed {
                tracing::info!(room = %handle.name(), "Deleted inactive room");
                evicted.push(handle.name().to_string());
            }
        }

        if !evicted.is_empty() {
            self.publish_room_list().await;
        }
        evicted
    }
}
