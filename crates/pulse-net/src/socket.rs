//! WebSocket socket task with tokio mpsc command/notification pattern.
//!
//! The socket task runs in a dedicated tokio task and owns the entire
//! connection lifecycle: bounded-retry dialing, the authenticated handshake,
//! frame pumping, and the automatic reconnect that follows a
//! server-initiated drop. External code communicates with it through typed
//! command and notification channels and observes connectivity through a
//! `watch` channel, keeping the transport fully asynchronous and decoupled.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use pulse_shared::constants::{
    COMMAND_BUFFER, CONNECT_RETRY_DELAY_MS, MAX_CONNECT_ATTEMPTS, NOTIFICATION_BUFFER,
    RECONNECT_DELAY_MS,
};
use pulse_shared::protocol::{ClientEvent, ServerEvent};
use pulse_shared::types::{ConnectionStatus, UserId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the socket task.
#[derive(Debug)]
pub enum SocketCommand {
    /// Emit an event frame to the server.
    Emit(ClientEvent),
    /// Gracefully shut down the socket. No reconnect follows.
    Shutdown,
}

/// Notifications sent *from* the socket task to the session.
#[derive(Debug, Clone)]
pub enum SocketNotification {
    /// The handshake completed; the connection is authenticated and live.
    Up,
    /// The connection dropped. `server_initiated` distinguishes drops the
    /// task will recover from on its own from client-requested teardown.
    Down {
        reason: String,
        server_initiated: bool,
    },
    /// An event frame arrived from the server.
    Event(ServerEvent),
}

/// Configuration for opening a socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket endpoint of the chat server, e.g. `wss://host/realtime`.
    pub server_url: String,
    /// Opaque session credential, presented in the connection request.
    pub auth_token: String,
    /// The authenticated user's id.
    pub self_user_id: UserId,
    /// Maximum consecutive dial attempts per connect cycle.
    pub max_connect_attempts: u32,
    /// Delay between dial attempts.
    pub retry_delay: Duration,
    /// Delay before the reconnect cycle that follows a server-initiated drop.
    pub reconnect_delay: Duration,
}

impl SocketConfig {
    pub fn new(server_url: impl Into<String>, auth_token: impl Into<String>, user: UserId) -> Self {
        Self {
            server_url: server_url.into(),
            auth_token: auth_token.into(),
            self_user_id: user,
            max_connect_attempts: MAX_CONNECT_ATTEMPTS,
            retry_delay: Duration::from_millis(CONNECT_RETRY_DELAY_MS),
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }

    /// Connection request URL carrying the handshake credentials.
    fn request_url(&self) -> String {
        format!(
            "{}?token={}&userId={}",
            self.server_url, self.auth_token, self.self_user_id
        )
    }
}

/// Channel ends handed to the socket's owner.
pub struct SocketHandle {
    pub commands: mpsc::Sender<SocketCommand>,
    pub notifications: mpsc::Receiver<SocketNotification>,
    pub status: watch::Receiver<ConnectionStatus>,
}

/// Spawn the WebSocket socket task.
///
/// Returns channels for sending commands and receiving notifications, plus a
/// watch over the connection status.
pub fn spawn_ws_socket(config: SocketConfig) -> SocketHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(COMMAND_BUFFER);
    let (notif_tx, notif_rx) = mpsc::channel::<SocketNotification>(NOTIFICATION_BUFFER);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

    tokio::spawn(async move {
        socket_loop(config, cmd_rx, notif_tx, status_tx).await;
    });

    SocketHandle {
        commands: cmd_tx,
        notifications: notif_rx,
        status: status_rx,
    }
}

/// Outcome of a single pump cycle over an established connection.
enum PumpExit {
    /// Client-requested shutdown; the lifecycle loop must end.
    Shutdown,
    /// The connection dropped underneath us; eligible for auto-reconnect.
    Dropped(String),
}

async fn socket_loop(
    config: SocketConfig,
    mut cmd_rx: mpsc::Receiver<SocketCommand>,
    notif_tx: mpsc::Sender<SocketNotification>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    loop {
        let _ = status_tx.send(ConnectionStatus::Connecting);

        let ws = match dial_with_retry(&config, &mut cmd_rx).await {
            DialOutcome::Connected(ws) => ws,
            DialOutcome::Shutdown => {
                let _ = status_tx.send(ConnectionStatus::Disconnected);
                let _ = notif_tx
                    .send(SocketNotification::Down {
                        reason: "client shutdown".to_string(),
                        server_initiated: false,
                    })
                    .await;
                break;
            }
            DialOutcome::GaveUp => {
                let _ = status_tx.send(ConnectionStatus::Disconnected);
                let _ = notif_tx
                    .send(SocketNotification::Down {
                        reason: format!(
                            "gave up after {} connection attempts",
                            config.max_connect_attempts
                        ),
                        server_initiated: false,
                    })
                    .await;
                break;
            }
        };

        match pump(ws, &mut cmd_rx, &notif_tx, &status_tx).await {
            PumpExit::Shutdown => {
                let _ = status_tx.send(ConnectionStatus::Disconnected);
                let _ = notif_tx
                    .send(SocketNotification::Down {
                        reason: "client shutdown".to_string(),
                        server_initiated: false,
                    })
                    .await;
                break;
            }
            PumpExit::Dropped(reason) => {
                let _ = status_tx.send(ConnectionStatus::Disconnected);
                let _ = notif_tx
                    .send(SocketNotification::Down {
                        reason: reason.clone(),
                        server_initiated: true,
                    })
                    .await;
                warn!(reason = %reason, "Connection dropped, scheduling reconnect");
                tokio::time::sleep(config.reconnect_delay).await;
            }
        }
    }

    info!("Socket task terminated");
}

enum DialOutcome {
    Connected(WsStream),
    Shutdown,
    GaveUp,
}

/// Dial the server with a bounded number of attempts at a fixed delay.
/// A `Shutdown` command received mid-dial aborts the cycle.
async fn dial_with_retry(
    config: &SocketConfig,
    cmd_rx: &mut mpsc::Receiver<SocketCommand>,
) -> DialOutcome {
    let url = config.request_url();

    for attempt in 1..=config.max_connect_attempts {
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                info!(attempt, url = %config.server_url, "Transport established");
                return DialOutcome::Connected(ws);
            }
            Err(e) => {
                warn!(
                    attempt,
                    max = config.max_connect_attempts,
                    error = %e,
                    "Connection attempt failed"
                );
            }
        }

        if attempt < config.max_connect_attempts {
            tokio::select! {
                _ = tokio::time::sleep(config.retry_delay) => {}
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SocketCommand::Shutdown) | None => return DialOutcome::Shutdown,
                        Some(SocketCommand::Emit(event)) => {
                            // Sends require a live transport; callers are
                            // expected to have checked. Drop and log.
                            warn!(event = ?event, "Dropping emit while connecting");
                        }
                    }
                }
            }
        }
    }

    error!(
        attempts = config.max_connect_attempts,
        url = %config.server_url,
        "Exhausted connection attempts"
    );
    DialOutcome::GaveUp
}

/// Pump frames in both directions until the connection ends.
async fn pump(
    ws: WsStream,
    cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    notif_tx: &mpsc::Sender<SocketNotification>,
    status_tx: &watch::Sender<ConnectionStatus>,
) -> PumpExit {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            // --- Outgoing commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SocketCommand::Emit(event)) => {
                        let raw = match event.to_json() {
                            Ok(raw) => raw,
                            Err(e) => {
                                error!(error = %e, "Failed to encode outbound frame");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(WsMessage::Text(raw)).await {
                            error!(error = %e, "Send failed");
                            return PumpExit::Dropped(format!("send failed: {e}"));
                        }
                    }
                    Some(SocketCommand::Shutdown) => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return PumpExit::Shutdown;
                    }
                    None => {
                        // All senders dropped
                        info!("Command channel closed, shutting down socket");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return PumpExit::Shutdown;
                    }
                }
            }

            // --- Incoming frames ---
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(raw))) => {
                        let event = match ServerEvent::from_json(&raw) {
                            Ok(event) => event,
                            Err(e) => {
                                // Unknown or malformed frames are skipped,
                                // never fatal.
                                debug!(error = %e, len = raw.len(), "Ignoring unparseable frame");
                                continue;
                            }
                        };

                        match event {
                            ServerEvent::Connect => {
                                let _ = status_tx.send(ConnectionStatus::Connected);
                                info!("Handshake acknowledged, connection live");
                                let _ = notif_tx.send(SocketNotification::Up).await;
                            }
                            ServerEvent::Disconnect(reason) => {
                                info!(reason = %reason, "Server requested disconnect");
                                return PumpExit::Dropped(reason);
                            }
                            other => {
                                let _ = notif_tx.send(SocketNotification::Event(other)).await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        return PumpExit::Dropped("connection closed by server".to_string());
                    }
                    Some(Ok(_)) => {
                        // Ping/pong/binary frames carry no protocol events.
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Transport read error");
                        return PumpExit::Dropped(format!("read error: {e}"));
                    }
                    None => {
                        return PumpExit::Dropped("connection stream ended".to_string());
                    }
                }
            }
        }
    }
}
