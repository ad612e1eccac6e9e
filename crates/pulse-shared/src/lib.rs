//! # pulse-shared
//!
//! Domain types and wire protocol for the Pulse realtime messaging core.
//!
//! This crate is I/O-free: it defines the message/conversation/presence
//! domain model, the JSON event frames exchanged with the chat server
//! (including the normalization of the server's shape-shifting id fields),
//! the error taxonomy, and the tuning constants shared by the transport and
//! session layers.

pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use error::{PulseError, Result};
