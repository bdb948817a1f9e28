//! Room actor: the single owner of one room's membership and name registry.
//!
//! All mutations arrive as `RoomCommand`s on one bounded queue and are applied
//! by `run_room` one at a time, so a join is always visible to the next
//! broadcast and broadcast order equals processing order. `Room` itself is
//! plain synchronous state; the actor loop is the only place it is touched.
//!
//! Admission goes through the same queue: `Reserve` checks members plus
//! outstanding reservations against the cap and holds a slot, and the `Join`
//! that follows the upgrade consumes it. A reservation whose upgrade never
//! happens is released when its `RoomReservation` is dropped.
//!
//! Fan-out never blocks: a member whose outbound queue is full is dropped on
//! the spot (queue closed, name released, no farewell line) and discovers the
//! closure through its own pump.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::chat::username::{validate_username, UsernameError};
use crate::proto::{Envelope, Frame, ROOM_CLOSED_TEXT};
use crate::ws::{ConnectionId, OutboundSender};

/// The room actor is gone (retired by the sweep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room is closed")]
    Closed,
}

/// Requests processed by a room actor, in arrival order.
#[derive(Debug)]
pub enum RoomCommand {
    /// Hold a slot if members plus outstanding reservations are below `max_members`.
    Reserve {
        max_members: usize,
        reply: oneshot::Sender<bool>,
    },
    /// Give back a slot whose connection never joined.
    Release,
    Join {
        conn: ConnectionId,
        outbound: OutboundSender,
        /// Consumes a slot taken by an earlier `Reserve`.
        reserved: bool,
        reply: oneshot::Sender<()>,
    },
    SetUsername {
        conn: ConnectionId,
        username: String,
    },
    Chat {
        conn: ConnectionId,
        content: String,
    },
    Typing {
        conn: ConnectionId,
    },
    Leave {
        conn: ConnectionId,
    },
    /// Directory-originated fan-out (room list, room added). Not member activity.
    Broadcast(Frame),
    MemberCount(oneshot::Sender<usize>),
    /// Close every member and stop the actor if idle for longer than `idle_timeout`.
    RetireIfIdle {
        idle_timeout: Duration,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug)]
struct Member {
    outbound: OutboundSender,
    username: Option<String>,
}

/// Membership, name registry and activity clock for one room.
#[derive(Debug)]
pub struct Room {
    name: String,
    members: HashMap<ConnectionId, Member>,
    usernames: HashMap<String, ConnectionId>,
    reserved: usize,
    last_activity: Instant,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
            usernames: HashMap::new(),
            reserved: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Slots held for connections that have been admitted but not joined yet.
    pub fn reserved_slots(&self) -> usize {
        self.reserved
    }

    pub fn username_of(&self, conn: ConnectionId) -> Option<&str> {
        self.members.get(&conn)?.username.as_deref()
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.usernames.contains_key(name)
    }

    /// Time since the last member-originated operation.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Apply one command. `Break` means the room retired and the actor must stop.
    pub fn handle(&mut self, cmd: RoomCommand) -> ControlFlow<()> {
        match cmd {
            RoomCommand::Reserve { max_members, reply } => {
                let _ = reply.send(self.reserve(max_members));
            }
            RoomCommand::Release => self.release_slot(),
            RoomCommand::Join {
                conn,
                outbound,
                reserved,
                reply,
            } => {
                if reserved {
                    self.release_slot();
                }
                self.join(conn, outbound);
                let _ = reply.send(());
            }
            RoomCommand::SetUsername { conn, username } => {
                let _ = self.set_username(conn, &username);
            }
            RoomCommand::Chat { conn, content } => self.chat(conn, content),
            RoomCommand::Typing { conn } => self.typing(conn),
            RoomCommand::Leave { conn } => self.leave(conn),
            RoomCommand::Broadcast(frame) => self.broadcast(&frame),
            RoomCommand::MemberCount(reply) => {
                let _ = reply.send(self.member_count());
            }
            RoomCommand::RetireIfIdle {
                idle_timeout,
                reply,
            } => {
                let retired = self.retire_if_idle(idle_timeout);
                let _ = reply.send(retired);
                if retired {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Hold one slot for an admitted connection. Returns false when members
    /// plus held slots already reach `max_members`.
    pub fn reserve(&mut self, max_members: usize) -> bool {
        if self.members.len() + self.reserved >= max_members {
            return false;
        }
        self.reserved += 1;
        self.touch();
        true
    }

    fn release_slot(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }

    /// Add a connection. Capacity is enforced through `reserve` before this point.
    pub fn join(&mut self, conn: ConnectionId, outbound: OutboundSender) {
        self.members.insert(
            conn,
            Member {
                outbound,
                username: None,
            },
        );
        self.touch();
        tracing::info!(
            room = %self.name,
            conn_id = conn,
            members = self.members.len(),
            "Client registered"
        );
    }

    /// Claim a display name. Failures go back to the requester only.
    pub fn set_username(&mut self, conn: ConnectionId, name: &str) -> Result<(), UsernameError> {
        let Some(member) = self.members.get(&conn) else {
            return Ok(());
        };
        let result = if member.username.is_some() {
            Err(UsernameError::AlreadySet)
        } else {
            validate_username(name).and_then(|()| {
                if self.usernames.contains_key(name) {
                    Err(UsernameError::Taken)
                } else {
                    Ok(())
                }
            })
        };

        if let Err(err) = result {
            tracing::debug!(room = %self.name, conn_id = conn, error = %err, "Username rejected");
            self.send_to(conn, &Envelope::error(err.to_string()).to_frame());
            return Err(err);
        }

        if let Some(member) = self.members.get_mut(&conn) {
            member.username = Some(name.to_string());
        }
        self.usernames.insert(name.to_string(), conn);
        self.touch();
        tracing::info!(room = %self.name, conn_id = conn, username = %name, "Username set");
        self.broadcast(&Envelope::system(format!("{name} has joined the chat.")).to_frame());
        Ok(())
    }

    /// Relay a chat line. Ignored until the sender has a name.
    pub fn chat(&mut self, conn: ConnectionId, content: String) {
        let Some(username) = self.username_of(conn).map(str::to_owned) else {
            return;
        };
        self.touch();
        self.broadcast(&Envelope::chat(username, content).to_frame());
    }

    pub fn typing(&mut self, conn: ConnectionId) {
        let Some(username) = self.username_of(conn).map(str::to_owned) else {
            return;
        };
        self.touch();
        self.broadcast(&Envelope::typing(username).to_frame());
    }

    /// Remove a connection, closing its outbound queue, and announce the departure if it was named.
    pub fn leave(&mut self, conn: ConnectionId) {
        let Some(member) = self.remove_member(conn) else {
            return;
        };
        self.touch();
        tracing::info!(
            room = %self.name,
            conn_id = conn,
            members = self.members.len(),
            "Client unregistered"
        );
        let Member { outbound, username } = member;
        drop(outbound);
        if let Some(name) = username {
            self.broadcast(&Envelope::system(format!("{name} has left the chat.")).to_frame());
        }
    }

    /// Push `frame` to every member without waiting. Members whose queue is
    /// full or closed are removed.
    pub fn broadcast(&mut self, frame: &Frame) {
        let unreachable: Vec<ConnectionId> = self
            .members
            .iter()
            .filter(|(_, m)| m.outbound.try_send(Arc::clone(frame)).is_err())
            .map(|(conn, _)| *conn)
            .collect();

        for conn in unreachable {
            if let Some(member) = self.remove_member(conn) {
                tracing::warn!(
                    room = %self.name,
                    conn_id = conn,
                    username = member.username.as_deref().unwrap_or(""),
                    "Dropping slow client (outbound queue full)"
                );
            }
        }
    }

    fn send_to(&mut self, conn: ConnectionId, frame: &Frame) {
        let delivered = self
            .members
            .get(&conn)
            .is_some_and(|m| m.outbound.try_send(Arc::clone(frame)).is_ok());
        if !delivered && self.remove_member(conn).is_some() {
            tracing::warn!(room = %self.name, conn_id = conn, "Dropping slow client (outbound queue full)");
        }
    }

    fn remove_member(&mut self, conn: ConnectionId) -> Option<Member> {
        let member = self.members.remove(&conn)?;
        if let Some(name) = &member.username {
            let owner = self.usernames.remove(name);
            if owner != Some(conn) {
                tracing::error!(room = %self.name, conn_id = conn, username = %name, "Name registry out of sync");
                debug_assert_eq!(owner, Some(conn), "registry entry must point at its member");
            }
        }
        Some(member)
    }

    /// If idle beyond `idle_timeout`, close every member with the closure
    /// notice. Returns whether the room retired.
    ///
    /// The notice travels on each member's close path rather than its frame
    /// queue, so a member with a full queue still receives it.
    pub fn retire_if_idle(&mut self, idle_timeout: Duration) -> bool {
        if self.idle_for() <= idle_timeout {
            return false;
        }
        let notice = Envelope::error(ROOM_CLOSED_TEXT).to_frame();
        let closed = self.members.len();
        for (_, member) in self.members.drain() {
            member.outbound.close_with(Arc::clone(&notice));
        }
        self.usernames.clear();
        self.reserved = 0;
        tracing::info!(room = %self.name, closed, "Room retired for inactivity");
        true
    }
}

/// Process commands until every handle is dropped or the room retires.
pub async fn run_room(mut room: Room, mut rx: mpsc::Receiver<RoomCommand>) {
    while let Some(cmd) = rx.recv().await {
        if room.handle(cmd).is_break() {
            break;
        }
    }
    tracing::debug!(room = %room.name(), "Room actor stopped");
}

/// Cloneable address of a running room actor.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: u64,
    name: Arc<str>,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Spawn the actor for a new, empty room.
    pub fn spawn(id: u64, name: &str, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        tokio::spawn(run_room(Room::new(name), rx));
        Self {
            id,
            name: Arc::from(name),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the actor loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether two handles address the same actor instance.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.id == other.id
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.tx.send(cmd).await.map_err(|_| RoomError::Closed)
    }

    /// Join without a reservation and wait until the room has applied it.
    pub async fn join(&self, conn: ConnectionId, outbound: OutboundSender) -> Result<(), RoomError> {
        self.join_with(conn, outbound, false).await
    }

    async fn join_with(
        &self,
        conn: ConnectionId,
        outbound: OutboundSender,
        reserved: bool,
    ) -> Result<(), RoomError> {
        let (reply, joined) = oneshot::channel();
        self.send(RoomCommand::Join {
            conn,
            outbound,
            reserved,
            reply,
        })
        .await?;
        joined.await.map_err(|_| RoomError::Closed)
    }

    /// Ask the room to hold a slot under `max_members`. `None` means it is full.
    pub async fn reserve(&self, max_members: usize) -> Result<Option<RoomReservation>, RoomError> {
        let (reply, granted) = oneshot::channel();
        self.send(RoomCommand::Reserve { max_members, reply }).await?;
        let granted = granted.await.map_err(|_| RoomError::Closed)?;
        Ok(granted.then(|| RoomReservation {
            room: self.clone(),
            held: true,
        }))
    }

    pub async fn set_username(&self, conn: ConnectionId, username: String) -> Result<(), RoomError> {
        self.send(RoomCommand::SetUsername { conn, username }).await
    }

    pub async fn chat(&self, conn: ConnectionId, content: String) -> Result<(), RoomError> {
        self.send(RoomCommand::Chat { conn, content }).await
    }

    pub async fn typing(&self, conn: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomCommand::Typing { conn }).await
    }

    pub async fn leave(&self, conn: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomCommand::Leave { conn }).await
    }

    pub async fn broadcast(&self, frame: Frame) -> Result<(), RoomError> {
        self.send(RoomCommand::Broadcast(frame)).await
    }

    pub async fn member_count(&self) -> Result<usize, RoomError> {
        let (reply, count) = oneshot::channel();
        self.send(RoomCommand::MemberCount(reply)).await?;
        count.await.map_err(|_| RoomError::Closed)
    }

    /// Ask the actor to retire itself if idle. The decision is made inside the
    /// actor, so it cannot interleave with a join or broadcast on this room.
    pub async fn retire_if_idle(&self, idle_timeout: Duration) -> Result<bool, RoomError> {
        let (reply, retired) = oneshot::channel();
        self.send(RoomCommand::RetireIfIdle {
            idle_timeout,
            reply,
        })
        .await?;
        retired.await.map_err(|_| RoomError::Closed)
    }
}

/// A slot held in a room between admission and join.
///
/// Dropping it without joining gives the slot back.
#[derive(Debug)]
pub struct RoomReservation {
    room: RoomHandle,
    held: bool,
}

impl RoomReservation {
    pub fn room(&self) -> &RoomHandle {
        &self.room
    }

    /// Join the reserved room, consuming the slot.
    pub async fn join(mut self, conn: ConnectionId, outbound: OutboundSender) -> Result<RoomHandle, RoomError> {
        let room = self.room.clone();
        self.held = false;
        room.join_with(conn, outbound, true).await?;
        Ok(room)
    }
}

impl Drop for RoomReservation {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        match self.room.tx.try_send(RoomCommand::Release) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => {
                // Queue busy; hand the release to a task instead of losing the slot
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let tx = self.room.tx.clone();
                    runtime.spawn(async move {
                        let _ = tx.send(cmd).await;
                    });
                }
            }
        }
    }
}
