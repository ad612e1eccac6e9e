//! REST collaborators of the realtime core.
//!
//! The chat backend exposes a small REST surface next to the realtime
//! transport: message history by conversation, the conversation/participant
//! list, file attachment upload, and notification read-marking. The session
//! consumes them through the [`ChatApi`] trait so tests can substitute an
//! in-memory implementation; [`RestApi`] is the production one.

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use pulse_shared::protocol::WireMessage;
use pulse_shared::types::{ConversationId, ConversationMeta, FilePayload, Message};

/// Errors produced by the REST layer.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    /// The response body did not match the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ApiError>;

/// The REST surface the session depends on. Each call is an opaque async
/// function returning a typed result or failing with a transport-level
/// error.
pub trait ChatApi: Clone + Send + Sync + 'static {
    /// One-shot fetch of a conversation's message history page.
    fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Fetch the conversation list with participants and group metadata.
    fn fetch_conversations(&self) -> impl Future<Output = Result<Vec<ConversationMeta>>> + Send;

    /// Upload a file attachment; the returned payload is ready to send as a
    /// file message.
    fn upload_attachment(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<FilePayload>> + Send;

    /// Mark a notification as read on the server.
    fn mark_notification_read(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// reqwest-backed [`ChatApi`] implementation.
#[derive(Clone)]
pub struct RestApi {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl RestApi {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn check_status(response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }
    Ok(())
}

impl ChatApi for RestApi {
    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let response = self
            .http
            .get(self.url(&format!("/chats/{conversation_id}/messages")))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        check_status(&response)?;

        // History records use the same shape as realtime message events.
        let records: Vec<WireMessage> = response.json().await?;
        debug!(conversation = %conversation_id, count = records.len(), "Fetched history page");

        records
            .into_iter()
            .map(|record| {
                record
                    .into_message()
                    .map_err(|e| ApiError::Decode(e.to_string()))
            })
            .collect()
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationMeta>> {
        let response = self
            .http
            .get(self.url("/chats"))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        check_status(&response)?;
        Ok(response.json().await?)
    }

    async fn upload_attachment(&self, file_name: &str, bytes: Vec<u8>) -> Result<FilePayload> {
        let size = bytes.len() as u64;
        let response = self
            .http
            .post(self.url(&format!("/files/{file_name}")))
            .bearer_auth(&self.auth_token)
            .body(bytes)
            .send()
            .await?;
        check_status(&response)?;

        let uploaded: UploadResponse = response.json().await?;
        Ok(FilePayload {
            url: uploaded.url,
            name: file_name.to_string(),
            size: Some(size),
        })
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/notifications/{id}/read")))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        check_status(&response)
    }
}

#[cfg(test)]
mod tests {
    use pulse_shared::protocol::WireMessage;
    use pulse_shared::types::MessagePayload;

    #[test]
    fn test_history_records_parse_like_realtime_messages() {
        let raw = r#"[
            {
                "id": "1",
                "refId": "17",
                "msgType": "text",
                "msgParams": {"text": "hello"},
                "sent_by": {"id": 42, "role": "CLIENT", "name": "Bob"},
                "status": "read",
                "created": "2025-03-01T10:00:00Z",
                "modified": "2025-03-01T10:05:00Z"
            }
        ]"#;

        let records: Vec<WireMessage> = serde_json::from_str(raw).unwrap();
        let message = records.into_iter().next().unwrap().into_message().unwrap();

        assert_eq!(message.id, "1");
        assert_eq!(message.sender.display_name.as_deref(), Some("Bob"));
        assert_eq!(message.payload, MessagePayload::text("hello"));
    }
}
