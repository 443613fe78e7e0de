use std::sync::Arc;

use tidings_core::{
    ComposeContext, ConversationId, ErrorCategory, EventBus, Message, MessageId, MutationAction,
    OutboundEvent, Session, SharedCache, SyncError, SyncEvent,
};
use tracing::{debug, info, warn};

use crate::{
    api::{MessagingApi, UploadRequest},
    transport::PushSender,
};

/// Executes user actions against the gateway and reconciles confirmed results into the
/// cache.
///
/// Sends, edits and uploads enter the cache only with the message the gateway returned.
/// Deletions are applied only after the gateway confirmed them. A failed mutation
/// leaves the cache untouched and is reported as [`SyncEvent::MutationFailed`].
#[derive(Clone)]
pub struct MutationDispatcher {
    api: Arc<dyn MessagingApi>,
    cache: SharedCache,
    events: EventBus,
    push: PushSender,
}

impl MutationDispatcher {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        cache: SharedCache,
        events: EventBus,
        push: PushSender,
    ) -> Self {
        Self {
            api,
            cache,
            events,
            push,
        }
    }

    pub async fn send(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::new(
                ErrorCategory::Config,
                "empty_message",
                "message text is empty",
            ));
        }

        let message = self
            .api
            .send_message(session, conversation_id, text, reply_to)
            .await
            .map_err(|err| self.fail(MutationAction::Send, conversation_id, err))?;

        info!(conversation_id, message_id = message.id, "message sent");
        self.insert_confirmed(conversation_id, &message);
        Ok(message)
    }

    pub async fn edit(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, SyncError> {
        let message = self
            .api
            .edit_message(session, conversation_id, message_id, text)
            .await
            .map_err(|err| self.fail(MutationAction::Edit, conversation_id, err))?;

        let updated = self.cache.write(|cache| {
            let updated = cache.update(message.conversation_id, message.clone());
            if cache.compose_context(conversation_id) == Some(ComposeContext::Edit(message_id)) {
                cache.clear_compose_context(conversation_id);
            }
            updated
        });
        debug!(conversation_id, message_id, updated, "message edited");
        if updated {
            self.events.emit(SyncEvent::TimelineChanged {
                conversation_id: message.conversation_id,
            });
        }
        Ok(message)
    }

    /// Delete `message_ids`; local removal happens only after confirmation.
    pub async fn delete(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<usize, SyncError> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        self.api
            .delete_messages(session, conversation_id, message_ids)
            .await
            .map_err(|err| self.fail(MutationAction::Delete, conversation_id, err))?;

        let removed = self
            .cache
            .write(|cache| cache.remove_by_ids(conversation_id, message_ids));
        info!(conversation_id, requested = message_ids.len(), removed, "messages deleted");
        if removed > 0 {
            self.events.emit(SyncEvent::TimelineChanged { conversation_id });
        }
        Ok(removed)
    }

    pub async fn upload(
        &self,
        session: &Session,
        upload: UploadRequest,
    ) -> Result<Message, SyncError> {
        let conversation_id = upload.conversation_id;
        let size = upload.bytes.len();
        let message = self
            .api
            .upload_file(session, upload)
            .await
            .map_err(|err| self.fail(MutationAction::Upload, conversation_id, err))?;

        info!(conversation_id, message_id = message.id, size, "file uploaded");
        self.insert_confirmed(conversation_id, &message);
        Ok(message)
    }

    /// Fire-and-forget read receipt over the push channel.
    pub fn mark_read(&self, conversation_id: ConversationId) -> bool {
        self.push.send(&OutboundEvent::MarkRead {
            chat_id: conversation_id,
        })
    }

    /// Fire-and-forget typing indicator over the push channel.
    pub fn start_typing(&self, conversation_id: ConversationId) -> bool {
        self.push.send(&OutboundEvent::StartTyping {
            chat_id: conversation_id,
        })
    }

    fn insert_confirmed(&self, conversation_id: ConversationId, message: &Message) {
        let target = message.conversation_id;
        let (inserted, dialog_updated) = self.cache.write(|cache| {
            let dialog_updated = cache.record_last_message(message);
            let inserted = cache.merge_newest(target, message.clone());
            if matches!(
                cache.compose_context(conversation_id),
                Some(ComposeContext::Reply(_))
            ) {
                cache.clear_compose_context(conversation_id);
            }
            (inserted, dialog_updated)
        });

        if dialog_updated {
            self.events.emit(SyncEvent::DialogsChanged);
        }
        if inserted {
            self.events.emit(SyncEvent::TimelineChanged {
                conversation_id: target,
            });
        }
    }

    fn fail(
        &self,
        action: MutationAction,
        conversation_id: ConversationId,
        err: SyncError,
    ) -> SyncError {
        warn!(?action, conversation_id, error = %err, "mutation failed");
        self.events.emit(SyncEvent::MutationFailed {
            action,
            conversation_id,
            error: err.clone(),
        });
        err
    }
}
