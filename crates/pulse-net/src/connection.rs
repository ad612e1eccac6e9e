//! Connection manager: single source of truth for connectivity.
//!
//! Owns the one live socket per session, serializes connect/reconnect
//! cycles, and forwards socket notifications onto the session's bridge
//! channel. Connection failures are logged and absorbed by the socket task's
//! retry policy; the manager never raises them to callers, who observe
//! connectivity through [`ConnectionManager::status`] and
//! [`ConnectionManager::is_connected`].

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use pulse_shared::protocol::{ClientEvent, PresencePayload, ServerEvent};
use pulse_shared::types::{ConnectionStatus, UserId};
use pulse_shared::PulseError;

use crate::socket::{
    spawn_ws_socket, SocketCommand, SocketConfig, SocketHandle, SocketNotification,
};

/// Last-known session credentials, kept for reconnects.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub auth_token: String,
    pub self_user_id: UserId,
}

/// Seam for opening sockets, so tests can substitute a scripted in-memory
/// transport for the WebSocket one.
pub trait SocketFactory: Send + Sync {
    fn open(&self, config: &SocketConfig) -> SocketHandle;
}

/// Production factory: spawns the real WebSocket socket task.
pub struct WsSocketFactory;

impl SocketFactory for WsSocketFactory {
    fn open(&self, config: &SocketConfig) -> SocketHandle {
        spawn_ws_socket(config.clone())
    }
}

/// Owns the single realtime connection of a session.
pub struct ConnectionManager {
    server_url: String,
    factory: Arc<dyn SocketFactory>,
    /// Session-lifetime channel all socket notifications are forwarded onto,
    /// across reconnects and socket replacements.
    bridge_tx: mpsc::Sender<SocketNotification>,
    credentials: Option<Credentials>,
    commands: Option<mpsc::Sender<SocketCommand>>,
    status: Option<watch::Receiver<ConnectionStatus>>,
}

impl ConnectionManager {
    pub fn new(
        server_url: impl Into<String>,
        factory: Arc<dyn SocketFactory>,
        bridge_tx: mpsc::Sender<SocketNotification>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            factory,
            bridge_tx,
            credentials: None,
            commands: None,
            status: None,
        }
    }

    /// Establish the session transport. Idempotent: with the same token and
    /// a live socket this only re-announces the local user's presence; with
    /// a different token the existing socket is torn down first.
    pub fn connect(&mut self, auth_token: impl Into<String>, self_user_id: UserId) {
        let auth_token = auth_token.into();

        if let Some(creds) = &self.credentials {
            // Same token and a socket that is live or still handshaking:
            // nothing to tear down, just re-announce when live.
            if creds.auth_token == auth_token && self.status() != ConnectionStatus::Disconnected {
                debug!("connect() with current credentials, socket already up");
                let _ = self.emit(ClientEvent::CheckOnline {
                    user_id: self_user_id.as_i64(),
                });
                return;
            }
        }

        self.shutdown_socket();

        info!(user = %self_user_id, "Opening session transport");
        self.credentials = Some(Credentials {
            auth_token: auth_token.clone(),
            self_user_id,
        });

        let config = SocketConfig::new(self.server_url.clone(), auth_token, self_user_id);
        self.open_socket(&config);
    }

    /// Tear down the transport. Client-initiated: no reconnect follows. A
    /// synthetic self-offline presence event is forwarded to local
    /// subscribers so the UI reflects the local user going offline without a
    /// server round trip. Idempotent.
    pub fn disconnect(&mut self) {
        self.shutdown_socket();

        if let Some(creds) = self.credentials.take() {
            info!(user = %creds.self_user_id, "Session transport closed");
            let _ = self
                .bridge_tx
                .try_send(SocketNotification::Event(ServerEvent::Offline(
                    PresencePayload::for_user(creds.self_user_id),
                )));
        }
    }

    /// Force a fresh connect cycle with the last-known credentials. Used
    /// after a credential refresh upstream or for forced recovery. A no-op
    /// when no credentials are present.
    pub fn reconnect(&mut self) {
        let Some(creds) = self.credentials.clone() else {
            debug!("reconnect() without credentials, ignoring");
            return;
        };

        self.shutdown_socket();

        info!(user = %creds.self_user_id, "Reopening session transport");
        let config = SocketConfig::new(
            self.server_url.clone(),
            creds.auth_token.clone(),
            creds.self_user_id,
        );
        self.open_socket(&config);
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
            .as_ref()
            .map(|w| *w.borrow())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Emit an event over the live transport. Fails fast with
    /// [`PulseError::NotConnected`] when there is none.
    pub fn emit(&self, event: ClientEvent) -> pulse_shared::Result<()> {
        if !self.is_connected() {
            return Err(PulseError::NotConnected);
        }
        let commands = self.commands.as_ref().ok_or(PulseError::NotConnected)?;
        commands
            .try_send(SocketCommand::Emit(event))
            .map_err(|e| PulseError::Transport(format!("transport queue unavailable: {e}")))
    }

    fn open_socket(&mut self, config: &SocketConfig) {
        let SocketHandle {
            commands,
            mut notifications,
            status,
        } = self.factory.open(config);

        self.commands = Some(commands);
        self.status = Some(status);

        // Forward this socket's notifications onto the session-lifetime
        // bridge; the forwarder ends when the socket task does.
        let bridge_tx = self.bridge_tx.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                if bridge_tx.send(notification).await.is_err() {
                    break;
                }
            }
        });
    }

    fn shutdown_socket(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.try_send(SocketCommand::Shutdown);
        }
        self.status = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Per-socket channel ends retained by the test to script the server.
    struct FakeSocket {
        commands: mpsc::Receiver<SocketCommand>,
        notifications: mpsc::Sender<SocketNotification>,
        status: watch::Sender<ConnectionStatus>,
        config: SocketConfig,
    }

    #[derive(Default)]
    struct FakeFactory {
        sockets: Mutex<Vec<FakeSocket>>,
    }

    impl FakeFactory {
        fn take_socket(&self, index: usize) -> FakeSocket {
            self.sockets.lock().unwrap().remove(index)
        }

        fn opened(&self) -> usize {
            self.sockets.lock().unwrap().len()
        }
    }

    impl SocketFactory for FakeFactory {
        fn open(&self, config: &SocketConfig) -> SocketHandle {
            let (cmd_tx, cmd_rx) = mpsc::channel(16);
            let (notif_tx, notif_rx) = mpsc::channel(16);
            let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

            self.sockets.lock().unwrap().push(FakeSocket {
                commands: cmd_rx,
                notifications: notif_tx,
                status: status_tx,
                config: config.clone(),
            });

            SocketHandle {
                commands: cmd_tx,
                notifications: notif_rx,
                status: status_rx,
            }
        }
    }

    fn manager_with_factory() -> (
        ConnectionManager,
        Arc<FakeFactory>,
        mpsc::Receiver<SocketNotification>,
    ) {
        let factory = Arc::new(FakeFactory::default());
        let (bridge_tx, bridge_rx) = mpsc::channel(64);
        let manager = ConnectionManager::new("ws://test", factory.clone(), bridge_tx);
        (manager, factory, bridge_rx)
    }

    #[tokio::test]
    async fn test_disconnected_until_socket_reports_connected() {
        let (mut manager, factory, _bridge) = manager_with_factory();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        manager.connect("token-a", UserId(1));
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert!(!manager.is_connected());

        let socket = factory.take_socket(0);
        socket.status.send(ConnectionStatus::Connected).unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_emit_requires_live_transport() {
        let (mut manager, factory, _bridge) = manager_with_factory();

        let result = manager.emit(ClientEvent::CheckOnline { user_id: 2 });
        assert!(matches!(result, Err(PulseError::NotConnected)));

        manager.connect("token-a", UserId(1));
        let mut socket = factory.take_socket(0);

        // Still handshaking: emits must keep failing.
        let result = manager.emit(ClientEvent::CheckOnline { user_id: 2 });
        assert!(matches!(result, Err(PulseError::NotConnected)));

        socket.status.send(ConnectionStatus::Connected).unwrap();
        manager.emit(ClientEvent::CheckOnline { user_id: 2 }).unwrap();

        let cmd = socket.commands.recv().await.unwrap();
        assert!(matches!(
            cmd,
            SocketCommand::Emit(ClientEvent::CheckOnline { user_id: 2 })
        ));
    }

    #[tokio::test]
    async fn test_connect_same_token_is_noop_reannounce() {
        let (mut manager, factory, _bridge) = manager_with_factory();

        manager.connect("token-a", UserId(1));
        let mut socket = factory.take_socket(0);
        socket.status.send(ConnectionStatus::Connected).unwrap();

        manager.connect("token-a", UserId(1));
        // No second socket was opened.
        assert_eq!(factory.opened(), 0);

        // But the local user's presence was re-announced.
        let cmd = socket.commands.recv().await.unwrap();
        assert!(matches!(
            cmd,
            SocketCommand::Emit(ClientEvent::CheckOnline { user_id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_connect_different_token_replaces_socket() {
        let (mut manager, factory, _bridge) = manager_with_factory();

        manager.connect("token-a", UserId(1));
        let mut old = factory.take_socket(0);
        old.status.send(ConnectionStatus::Connected).unwrap();

        manager.connect("token-b", UserId(1));

        // Old socket got the shutdown command, and exactly one new socket
        // replaced it.
        let cmd = old.commands.recv().await.unwrap();
        assert!(matches!(cmd, SocketCommand::Shutdown));
        assert_eq!(factory.opened(), 1);

        let new = factory.take_socket(0);
        assert_eq!(new.config.auth_token, "token-b");

        // Status now tracks the new socket only.
        old.status.send(ConnectionStatus::Connected).ok();
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_disconnect_emits_synthetic_self_offline_once() {
        let (mut manager, factory, mut bridge) = manager_with_factory();

        manager.connect("token-a", UserId(7));
        let mut socket = factory.take_socket(0);
        socket.status.send(ConnectionStatus::Connected).unwrap();

        manager.disconnect();
        manager.disconnect();

        let cmd = socket.commands.recv().await.unwrap();
        assert!(matches!(cmd, SocketCommand::Shutdown));
        assert!(!manager.is_connected());
        assert!(manager.credentials().is_none());

        // Exactly one synthetic offline for the local user, despite the
        // double disconnect.
        let notification = bridge.recv().await.unwrap();
        match notification {
            SocketNotification::Event(ServerEvent::Offline(payload)) => {
                assert_eq!(payload.subject(), Some(UserId(7)));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
        assert!(bridge.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_reuses_last_credentials() {
        let (mut manager, factory, _bridge) = manager_with_factory();

        manager.reconnect();
        assert_eq!(factory.opened(), 0);

        manager.connect("token-a", UserId(1));
        let mut old = factory.take_socket(0);
        old.status.send(ConnectionStatus::Connected).unwrap();

        manager.reconnect();
        let cmd = old.commands.recv().await.unwrap();
        assert!(matches!(cmd, SocketCommand::Shutdown));

        let fresh = factory.take_socket(0);
        assert_eq!(fresh.config.auth_token, "token-a");
        assert_eq!(fresh.config.self_user_id, UserId(1));
    }
}
