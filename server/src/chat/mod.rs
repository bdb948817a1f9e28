//! Rooms: the per-room actor, the directory that owns them, and the
//! background sweep that retires idle ones.

pub mod hub;
pub mod landing;
pub mod room;
pub mod sweep;
pub mod username;

pub use hub::{AdmissionError, Hub};
pub use room::{RoomCommand, RoomError, RoomHandle, RoomReservation};
