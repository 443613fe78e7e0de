use std::collections::HashMap;

use async_trait::async_trait;
use tidings_core::{ConversationId, Dialog, EntityId, Message, MessageId, Session, SyncError};

/// Parameters of one history page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: u16,
    /// Only return messages older than this id; `None` requests the newest page.
    pub before: Option<MessageId>,
}

impl HistoryQuery {
    pub fn newest(limit: u16) -> Self {
        Self {
            limit,
            before: None,
        }
    }

    pub fn older_than(limit: u16, before: MessageId) -> Self {
        Self {
            limit,
            before: Some(before),
        }
    }
}

/// File attachment sent through [`MessagingApi::upload_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub conversation_id: ConversationId,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub caption: Option<String>,
    pub reply_to: Option<MessageId>,
}

/// Request/response surface of the messaging gateway.
///
/// Every call carries the session handle. Pages are returned newest-first.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn list_dialogs(&self, session: &Session, limit: u32) -> Result<Vec<Dialog>, SyncError>;

    async fn fetch_history(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, SyncError>;

    /// Returns the message as persisted by the gateway.
    async fn send_message(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, SyncError>;

    async fn edit_message(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, SyncError>;

    async fn delete_messages(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), SyncError>;

    /// Avatar payloads keyed by entity id. Entities without an avatar are omitted.
    async fn fetch_avatars(
        &self,
        session: &Session,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, String>, SyncError>;

    async fn upload_file(
        &self,
        session: &Session,
        upload: UploadRequest,
    ) -> Result<Message, SyncError>;

    async fn logout(&self, session: &Session) -> Result<(), SyncError>;
}
