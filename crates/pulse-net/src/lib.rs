// Client transport layer: the session's WebSocket connection to the chat
// server, plus the connection manager that owns its lifecycle.

pub mod connection;
pub mod socket;

pub use connection::{ConnectionManager, Credentials, SocketFactory, WsSocketFactory};
pub use socket::{spawn_ws_socket, SocketCommand, SocketConfig, SocketHandle, SocketNotification};
