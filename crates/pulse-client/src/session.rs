//! Session actor: one task owning the realtime core.
//!
//! The actor owns the connection manager, reconciler, presence tracker,
//! notification router, and the cached conversation metadata. External code
//! drives it through the cloneable [`ChatSession`] handle (typed commands
//! with oneshot replies) and consumes per-conversation [`ViewUpdate`]
//! streams. All state mutation happens on the actor task, so the components
//! need no internal locking; the only genuinely async collaborator, the
//! REST api, runs on spawned tasks and re-enters the loop as internal
//! events.
//!
//! Conversation views are view-scoped: closing one unregisters its
//! listeners without touching the session transport. `disconnect` is the
//! single authoritative teardown point for the transport and is idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use pulse_net::{ConnectionManager, SocketFactory, SocketNotification, WsSocketFactory};
use pulse_shared::constants::{
    COMMAND_BUFFER, HISTORY_POLL_SECS, NOTIFICATION_BUFFER, VIEW_UPDATE_BUFFER,
};
use pulse_shared::protocol::{ClientEvent, ReceiptPayload, ServerEvent, WireMessage};
use pulse_shared::types::{
    ConnectionStatus, ConversationId, ConversationKind, ConversationMeta, Message, MessagePayload,
    MessageStatus, Notification, SenderRef, UserId,
};
use pulse_shared::{PulseError, Result};

use crate::api::{ApiError, ChatApi};
use crate::dispatcher;
use crate::notifications::NotificationRouter;
use crate::presence::PresenceTracker;
use crate::reconciler::{ConfirmOutcome, MergeOutcome, Reconciler, StatusOutcome};

/// Configuration for spawning a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the chat server.
    pub server_url: String,
    /// Interval of the history polling fallback for open conversations.
    pub history_poll: Duration,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            history_poll: Duration::from_secs(HISTORY_POLL_SECS),
        }
    }
}

/// Updates pushed to a conversation view.
#[derive(Debug, Clone)]
pub enum ViewUpdate {
    /// A new message entered the reconciled view (inbound or optimistic).
    MessageReceived(Message),
    /// A known message's delivery status moved forward.
    MessageStatusChanged { id: String, status: MessageStatus },
    /// An optimistic placeholder adopted its server id.
    MessageConfirmed { placeholder_id: String, id: String },
    /// A history page was merged; consumers should re-query the snapshot.
    HistoryLoaded,
    /// A counterpart's presence changed.
    Presence {
        user_id: UserId,
        is_online: bool,
        label: String,
    },
    /// An out-of-band notification for this conversation.
    Notification(Notification),
    /// The session transport's connectivity changed.
    Connection(ConnectionStatus),
}

enum SessionCommand {
    Connect {
        auth_token: String,
        self_profile: SenderRef,
    },
    Disconnect,
    Reconnect,
    Send {
        conversation_id: ConversationId,
        payload: MessagePayload,
        reply: oneshot::Sender<Result<Message>>,
    },
    SendFile {
        conversation_id: ConversationId,
        file_name: String,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<Message>>,
    },
    CheckOnline {
        user_id: UserId,
    },
    MarkNotificationRead {
        id: String,
    },
    OpenConversation {
        conversation_id: ConversationId,
        updates: mpsc::Sender<ViewUpdate>,
    },
    CloseConversation {
        conversation_id: ConversationId,
    },
    LoadHistory {
        conversation_id: ConversationId,
    },
    Messages {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Vec<Message>>,
    },
    UnresolvedPlaceholders {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Vec<Message>>,
    },
    PresenceLabel {
        user_id: UserId,
        reply: oneshot::Sender<String>,
    },
    Notifications {
        reply: oneshot::Sender<Vec<Notification>>,
    },
}

/// Results of spawned REST fetches, re-entering the actor loop.
enum InternalEvent {
    HistoryFetched {
        conversation_id: ConversationId,
        result: std::result::Result<Vec<Message>, ApiError>,
    },
    ConversationsFetched {
        result: std::result::Result<Vec<ConversationMeta>, ApiError>,
    },
    AttachmentUploaded {
        conversation_id: ConversationId,
        result: std::result::Result<pulse_shared::types::FilePayload, ApiError>,
        reply: oneshot::Sender<Result<Message>>,
    },
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct ChatSession {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

/// Spawn a session backed by the production WebSocket transport.
pub fn spawn_session<A: ChatApi>(config: SessionConfig, api: A) -> ChatSession {
    spawn_session_with_factory(config, api, Arc::new(WsSocketFactory))
}

/// Spawn a session with an explicit socket factory (tests inject a scripted
/// in-memory transport here).
pub fn spawn_session_with_factory<A: ChatApi>(
    config: SessionConfig,
    api: A,
    factory: Arc<dyn SocketFactory>,
) -> ChatSession {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (bridge_tx, bridge_rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let (internal_tx, internal_rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

    let actor = SessionActor {
        api,
        manager: ConnectionManager::new(config.server_url.clone(), factory, bridge_tx),
        cmd_rx,
        bridge_rx,
        internal_tx,
        internal_rx,
        status_tx,
        reconciler: Reconciler::new(),
        presence: PresenceTracker::new(),
        notifications: NotificationRouter::new(),
        conversations: HashMap::new(),
        views: HashMap::new(),
        self_profile: None,
        history_poll: config.history_poll,
    };

    tokio::spawn(actor.run());

    ChatSession {
        commands: cmd_tx,
        status: status_rx,
    }
}

impl ChatSession {
    /// Establish the session transport. Idempotent per the connection
    /// manager's rules; completion is observed via [`ChatSession::status`].
    pub async fn connect(
        &self,
        auth_token: impl Into<String>,
        self_profile: SenderRef,
    ) -> Result<()> {
        self.command(SessionCommand::Connect {
            auth_token: auth_token.into(),
            self_profile,
        })
        .await
    }

    /// Tear down the session transport. The single authoritative teardown
    /// point; safe to call twice.
    pub async fn disconnect(&self) -> Result<()> {
        self.command(SessionCommand::Disconnect).await
    }

    /// Force a fresh connect cycle with the last-known credentials.
    pub async fn reconnect(&self) -> Result<()> {
        self.command(SessionCommand::Reconnect).await
    }

    /// Send a message. Fails with [`PulseError::NotConnected`] while the
    /// transport is down; otherwise returns the optimistic placeholder that
    /// was handed to the reconciler.
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        payload: MessagePayload,
    ) -> Result<Message> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Send {
            conversation_id,
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| PulseError::SessionClosed)?
    }

    /// Upload an attachment and send it as a file message. Fails with
    /// [`PulseError::NotConnected`] while the transport is down; the upload
    /// itself runs over REST before the envelope is emitted.
    pub async fn send_file(
        &self,
        conversation_id: ConversationId,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Message> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::SendFile {
            conversation_id,
            file_name: file_name.into(),
            bytes,
            reply,
        })
        .await?;
        rx.await.map_err(|_| PulseError::SessionClosed)?
    }

    /// Fire-and-forget presence query; a no-op while disconnected.
    pub async fn check_online(&self, user_id: UserId) -> Result<()> {
        self.command(SessionCommand::CheckOnline { user_id }).await
    }

    /// Mark a notification as read on the server. Fire-and-forget; failures
    /// are logged.
    pub async fn mark_notification_read(&self, id: impl Into<String>) -> Result<()> {
        self.command(SessionCommand::MarkNotificationRead { id: id.into() })
            .await
    }

    /// Register a conversation view and receive its update stream. Also
    /// kicks off the initial history load.
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<mpsc::Receiver<ViewUpdate>> {
        let (tx, rx) = mpsc::channel(VIEW_UPDATE_BUFFER);
        self.command(SessionCommand::OpenConversation {
            conversation_id,
            updates: tx,
        })
        .await?;
        Ok(rx)
    }

    /// Unregister a conversation view. The shared transport stays up.
    pub async fn close_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        self.command(SessionCommand::CloseConversation { conversation_id })
            .await
    }

    /// Trigger a history refetch for a conversation.
    pub async fn load_history(&self, conversation_id: ConversationId) -> Result<()> {
        self.command(SessionCommand::LoadHistory { conversation_id })
            .await
    }

    /// Snapshot of the reconciled, ordered message view.
    pub async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Messages {
            conversation_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| PulseError::SessionClosed)
    }

    /// Placeholders still awaiting a send confirmation.
    pub async fn unresolved_placeholders(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::UnresolvedPlaceholders {
            conversation_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| PulseError::SessionClosed)
    }

    /// Human-readable presence label for a counterpart.
    pub async fn presence_label(&self, user_id: UserId) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::PresenceLabel { user_id, reply })
            .await?;
        rx.await.map_err(|_| PulseError::SessionClosed)
    }

    /// Notifications collected for the active conversation.
    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Notifications { reply }).await?;
        rx.await.map_err(|_| PulseError::SessionClosed)
    }

    pub fn is_connected(&self) -> bool {
        *self.status.borrow() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    async fn command(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PulseError::SessionClosed)
    }
}

struct SessionActor<A: ChatApi> {
    api: A,
    manager: ConnectionManager,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    bridge_rx: mpsc::Receiver<SocketNotification>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    reconciler: Reconciler,
    presence: PresenceTracker,
    notifications: NotificationRouter,
    /// Conversation metadata cache fed by the REST conversation list.
    conversations: HashMap<ConversationId, ConversationMeta>,
    /// Open conversation views and their update channels.
    views: HashMap<ConversationId, mpsc::Sender<ViewUpdate>>,
    self_profile: Option<SenderRef>,
    history_poll: Duration,
}

impl<A: ChatApi> SessionActor<A> {
    async fn run(mut self) {
        let mut poll = tokio::time::interval(self.history_poll);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                Some(notification) = self.bridge_rx.recv() => {
                    self.handle_notification(notification);
                }
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(event);
                }
                _ = poll.tick() => {
                    self.poll_histories();
                }
            }
        }

        info!("Session task terminated");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect {
                auth_token,
                self_profile,
            } => {
                self.manager.connect(auth_token, self_profile.id);
                self.self_profile = Some(self_profile);
                self.publish_status();
                self.spawn_conversations_fetch();
            }
            SessionCommand::Disconnect => {
                self.manager.disconnect();
                self.publish_status();
            }
            SessionCommand::Reconnect => {
                self.manager.reconnect();
                self.publish_status();
            }
            SessionCommand::Send {
                conversation_id,
                payload,
                reply,
            } => {
                let result = self.send(conversation_id, payload);
                let _ = reply.send(result);
            }
            SessionCommand::SendFile {
                conversation_id,
                file_name,
                bytes,
                reply,
            } => {
                if !self.manager.is_connected() {
                    let _ = reply.send(Err(PulseError::NotConnected));
                    return;
                }
                let api = self.api.clone();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = api.upload_attachment(&file_name, bytes).await;
                    let _ = tx
                        .send(InternalEvent::AttachmentUploaded {
                            conversation_id,
                            result,
                            reply,
                        })
                        .await;
                });
            }
            SessionCommand::CheckOnline { user_id } => {
                if self.manager.is_connected() {
                    let _ = self.manager.emit(ClientEvent::CheckOnline {
                        user_id: user_id.as_i64(),
                    });
                } else {
                    // Fire-and-forget: silently skipped while disconnected.
                    debug!(user = %user_id, "check-online skipped, not connected");
                }
            }
            SessionCommand::MarkNotificationRead { id } => {
                let api = self.api.clone();
                tokio::spawn(async move {
                    if let Err(e) = api.mark_notification_read(&id).await {
                        warn!(id = %id, error = %e, "Failed to mark notification read");
                    }
                });
            }
            SessionCommand::OpenConversation {
                conversation_id,
                updates,
            } => self.open_conversation(conversation_id, updates),
            SessionCommand::CloseConversation { conversation_id } => {
                self.views.remove(&conversation_id);
                if self.notifications.active() == Some(&conversation_id) {
                    self.notifications.close();
                }
                debug!(conversation = %conversation_id, "Conversation view closed");
            }
            SessionCommand::LoadHistory { conversation_id } => {
                self.spawn_history_fetch(conversation_id);
            }
            SessionCommand::Messages {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.reconciler.snapshot(&conversation_id));
            }
            SessionCommand::UnresolvedPlaceholders {
                conversation_id,
                reply,
            } => {
                let pending = self
                    .reconciler
                    .unresolved_placeholders(&conversation_id)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = reply.send(pending);
            }
            SessionCommand::PresenceLabel { user_id, reply } => {
                let _ = reply.send(self.presence.label(user_id));
            }
            SessionCommand::Notifications { reply } => {
                let _ = reply.send(self.notifications.items().to_vec());
            }
        }
    }

    fn send(
        &mut self,
        conversation_id: ConversationId,
        payload: MessagePayload,
    ) -> Result<Message> {
        if !self.manager.is_connected() {
            return Err(PulseError::NotConnected);
        }
        let sender = self
            .self_profile
            .clone()
            .ok_or(PulseError::NotConnected)?;

        // Kind comes from the cached metadata's group field; a conversation
        // we have no metadata for is treated as personal.
        let kind = self
            .conversations
            .get(&conversation_id)
            .map(|meta| meta.kind())
            .unwrap_or(ConversationKind::Personal);

        let (placeholder, envelope) =
            dispatcher::compose(conversation_id.clone(), kind, sender, payload);

        self.reconciler.merge(placeholder.clone());
        self.push_to(
            &conversation_id,
            ViewUpdate::MessageReceived(placeholder.clone()),
        );

        // No retry here: if the transport drops before the confirmation
        // arrives, the placeholder stays unresolved until a late echo after
        // reconnect or consumer cleanup.
        if let Err(e) = self.manager.emit(ClientEvent::Message(envelope)) {
            warn!(error = %e, "Send emission failed; placeholder left unconfirmed");
        }

        Ok(placeholder)
    }

    fn open_conversation(
        &mut self,
        conversation_id: ConversationId,
        updates: mpsc::Sender<ViewUpdate>,
    ) {
        info!(conversation = %conversation_id, "Conversation view opened");
        self.views.insert(conversation_id.clone(), updates);
        self.notifications.open(conversation_id.clone());

        if let Some(meta) = self.conversations.get(&conversation_id) {
            let counterparts: Vec<_> = meta
                .participants
                .iter()
                .filter(|p| Some(p.user_id) != self.self_id())
                .map(|p| (p.user_id, p.last_viewed))
                .collect();

            for (user_id, last_viewed) in counterparts {
                self.presence.observe(user_id, last_viewed);
                if self.manager.is_connected() {
                    let _ = self.manager.emit(ClientEvent::CheckOnline {
                        user_id: user_id.as_i64(),
                    });
                }
            }
        }

        self.spawn_history_fetch(conversation_id);
    }

    fn handle_notification(&mut self, notification: SocketNotification) {
        match notification {
            SocketNotification::Up => {
                info!("Session transport live");
                self.publish_status();
                self.broadcast(ViewUpdate::Connection(ConnectionStatus::Connected));
                self.reannounce_presence();
            }
            SocketNotification::Down {
                reason,
                server_initiated,
            } => {
                // Presence labels are deliberately not invalidated here:
                // stale-but-available beats blank while reconnecting.
                info!(reason = %reason, server_initiated, "Session transport down");
                self.publish_status();
                self.broadcast(ViewUpdate::Connection(self.manager.status()));
            }
            SocketNotification::Event(event) => self.handle_server_event(event),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Online(payload) => {
                let Some(user_id) = payload.subject() else {
                    warn!("Presence event without a subject id");
                    return;
                };
                self.presence.set_online(user_id);
                self.push_presence(user_id);
            }
            ServerEvent::Offline(payload) => {
                let Some(user_id) = payload.subject() else {
                    warn!("Presence event without a subject id");
                    return;
                };
                self.presence.set_offline(user_id, chrono::Utc::now());
                self.push_presence(user_id);
            }
            ServerEvent::RecieveMessage(wire) => self.handle_inbound_message(wire),
            ServerEvent::MessageSent(wire) => self.handle_send_confirmation(wire),
            ServerEvent::MessageDelivered(receipt) => {
                self.apply_receipt(receipt, MessageStatus::Delivered);
            }
            ServerEvent::MessageRead(receipt) => {
                self.apply_receipt(receipt, MessageStatus::Read);
            }
            ServerEvent::Notification(payload) => {
                let conversation_id = self.notifications.active().cloned();
                if let Some(stored) = self.notifications.on_notification(payload) {
                    let update = ViewUpdate::Notification(stored.clone());
                    if let Some(conversation_id) = conversation_id {
                        self.push_to(&conversation_id, update);
                    }
                }
            }
            // Connect/Disconnect frames are absorbed by the socket task and
            // surface as Up/Down notifications instead.
            ServerEvent::Connect | ServerEvent::Disconnect(_) => {}
        }
    }

    fn handle_inbound_message(&mut self, wire: WireMessage) {
        let message = match wire.into_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed inbound message");
                return;
            }
        };

        let conversation_id = message.conversation_id.clone();
        let sender_id = message.sender.id;
        let from_counterpart = Some(sender_id) != self.self_id();

        if from_counterpart {
            // Messages imply liveness even without an explicit presence
            // event.
            self.presence.on_activity(sender_id);
            self.push_presence(sender_id);
        }

        let message_id = message.id.clone();
        match self.reconciler.merge(message.clone()) {
            MergeOutcome::Inserted => {
                self.push_to(&conversation_id, ViewUpdate::MessageReceived(message));
            }
            MergeOutcome::StatusChanged(status) => {
                self.push_to(
                    &conversation_id,
                    ViewUpdate::MessageStatusChanged {
                        id: message_id.clone(),
                        status,
                    },
                );
            }
            MergeOutcome::Unchanged => {}
        }

        // Ack receipt for counterpart messages in the open conversation.
        if from_counterpart && self.views.contains_key(&conversation_id) {
            let _ = self.manager.emit(ClientEvent::Delivered(ReceiptPayload {
                ref_id: conversation_id.as_str().to_string(),
                id: message_id,
            }));
        }
    }

    fn handle_send_confirmation(&mut self, wire: WireMessage) {
        let message = match wire.into_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed send confirmation");
                return;
            }
        };

        // In group conversations the same event can echo another member's
        // send; those flow through the inbound path.
        if Some(message.sender.id) != self.self_id() {
            self.handle_inbound_message_from(message);
            return;
        }

        let conversation_id = message.conversation_id.clone();
        match self.reconciler.on_send_confirmation(message.clone()) {
            ConfirmOutcome::Confirmed {
                placeholder_id,
                server_id,
            } => {
                self.push_to(
                    &conversation_id,
                    ViewUpdate::MessageConfirmed {
                        placeholder_id,
                        id: server_id,
                    },
                );
            }
            // Late confirmation with no placeholder left (e.g. the view was
            // reopened, or another device of ours sent it).
            ConfirmOutcome::Merged(MergeOutcome::Inserted) => {
                self.push_to(&conversation_id, ViewUpdate::MessageReceived(message));
            }
            ConfirmOutcome::Merged(_) => {}
        }
    }

    /// Inbound handling for an already-converted message.
    fn handle_inbound_message_from(&mut self, message: Message) {
        let conversation_id = message.conversation_id.clone();
        let sender_id = message.sender.id;
        self.presence.on_activity(sender_id);
        self.push_presence(sender_id);

        if self.reconciler.merge(message.clone()) == MergeOutcome::Inserted {
            self.push_to(&conversation_id, ViewUpdate::MessageReceived(message));
        }
    }

    fn apply_receipt(&mut self, receipt: ReceiptPayload, status: MessageStatus) {
        let conversation_id = ConversationId(receipt.ref_id);
        match self
            .reconciler
            .apply_status(&conversation_id, &receipt.id, status)
        {
            StatusOutcome::Applied => {
                self.push_to(
                    &conversation_id,
                    ViewUpdate::MessageStatusChanged {
                        id: receipt.id,
                        status,
                    },
                );
            }
            // Stale and unknown receipts are logged by the reconciler.
            StatusOutcome::Stale | StatusOutcome::Unknown => {}
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::HistoryFetched {
                conversation_id,
                result,
            } => match result {
                Ok(messages) => {
                    self.reconciler.merge_history(&conversation_id, messages);
                    self.push_to(&conversation_id, ViewUpdate::HistoryLoaded);
                }
                Err(e) => {
                    warn!(conversation = %conversation_id, error = %e, "History fetch failed");
                }
            },
            InternalEvent::ConversationsFetched { result } => match result {
                Ok(list) => {
                    debug!(count = list.len(), "Conversation list refreshed");
                    for meta in list {
                        for participant in &meta.participants {
                            if Some(participant.user_id) != self.self_id() {
                                self.presence
                                    .observe(participant.user_id, participant.last_viewed);
                            }
                        }
                        self.conversations.insert(meta.id.clone(), meta);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Conversation list fetch failed");
                }
            },
            InternalEvent::AttachmentUploaded {
                conversation_id,
                result,
                reply,
            } => match result {
                Ok(payload) => {
                    let result = self.send(conversation_id, MessagePayload::File(payload));
                    let _ = reply.send(result);
                }
                Err(e) => {
                    warn!(conversation = %conversation_id, error = %e, "Attachment upload failed");
                    let _ = reply.send(Err(PulseError::Transport(format!(
                        "attachment upload failed: {e}"
                    ))));
                }
            },
        }
    }

    /// Liveness net for open conversations: refetch history on a fixed
    /// interval through the same merge path as push events.
    fn poll_histories(&mut self) {
        let open: Vec<_> = self.views.keys().cloned().collect();
        for conversation_id in open {
            self.spawn_history_fetch(conversation_id);
        }
    }

    fn spawn_history_fetch(&self, conversation_id: ConversationId) {
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_history(&conversation_id).await;
            let _ = tx
                .send(InternalEvent::HistoryFetched {
                    conversation_id,
                    result,
                })
                .await;
        });
    }

    fn spawn_conversations_fetch(&self) {
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_conversations().await;
            let _ = tx
                .send(InternalEvent::ConversationsFetched { result })
                .await;
        });
    }

    /// Re-announce presence interest after the transport (re)connects.
    fn reannounce_presence(&mut self) {
        let queries: Vec<i64> = self
            .views
            .keys()
            .filter_map(|cid| self.conversations.get(cid))
            .flat_map(|meta| meta.participants.iter())
            .filter(|p| Some(p.user_id) != self.self_id())
            .map(|p| p.user_id.as_i64())
            .collect();

        for user_id in queries {
            let _ = self.manager.emit(ClientEvent::CheckOnline { user_id });
        }
    }

    fn self_id(&self) -> Option<UserId> {
        self.self_profile.as_ref().map(|p| p.id)
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send(self.manager.status());
    }

    /// Push a presence change to every open view the user participates in;
    /// the local user's own transitions go to all views.
    fn push_presence(&mut self, user_id: UserId) {
        let update = ViewUpdate::Presence {
            user_id,
            is_online: self.presence.is_online(user_id),
            label: self.presence.label(user_id),
        };

        if Some(user_id) == self.self_id() {
            self.broadcast(update);
            return;
        }

        let targets: Vec<_> = self
            .views
            .keys()
            .filter(|cid| {
                self.conversations
                    .get(cid)
                    .is_some_and(|meta| meta.participants.iter().any(|p| p.user_id == user_id))
            })
            .cloned()
            .collect();

        for conversation_id in targets {
            self.push_to(&conversation_id, update.clone());
        }
    }

    fn push_to(&mut self, conversation_id: &ConversationId, update: ViewUpdate) {
        let Some(tx) = self.views.get(conversation_id) else {
            return;
        };
        match tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(conversation = %conversation_id, "View update dropped, consumer lagging");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(conversation = %conversation_id, "View receiver gone, closing view");
                self.views.remove(conversation_id);
                if self.notifications.active() == Some(conversation_id) {
                    self.notifications.close();
                }
            }
        }
    }

    fn broadcast(&mut self, update: ViewUpdate) {
        let targets: Vec<_> = self.views.keys().cloned().collect();
        for conversation_id in targets {
            self.push_to(&conversation_id, update.clone());
        }
    }
}
