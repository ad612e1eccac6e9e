//! # pulse-client
//!
//! Realtime messaging and presence core for the Pulse business-operations
//! application. One session-scoped task owns the WebSocket transport and
//! reconciles its event stream (messages, delivery/read receipts, presence,
//! notifications) with REST-fetched history into consistent per-conversation
//! views.
//!
//! The embedding application drives the core through the [`ChatSession`]
//! handle and renders from the [`ViewUpdate`] streams it subscribes to per
//! conversation; it never mutates core state directly.

pub mod api;
pub mod dispatcher;
pub mod notifications;
pub mod presence;
pub mod reconciler;
pub mod session;

pub use api::{ApiError, ChatApi, RestApi};
pub use presence::{PresenceRecord, PresenceTracker};
pub use session::{
    spawn_session, spawn_session_with_factory, ChatSession, SessionConfig, ViewUpdate,
};

use tracing_subscriber::{fmt, EnvFilter};

/// Install a tracing subscriber with sensible defaults for the core's
/// crates. Optional: embedding applications with their own subscriber setup
/// should skip this.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("pulse_client=debug,pulse_net=debug,pulse_shared=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
