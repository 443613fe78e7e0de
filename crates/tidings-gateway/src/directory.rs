use std::sync::Arc;

use tidings_core::{EntityId, EventBus, Session, SharedCache, SyncError, SyncEvent};
use tracing::{debug, warn};

use crate::api::MessagingApi;

/// Loads the dialog list and avatars into the cache.
#[derive(Clone)]
pub struct DirectoryLoader {
    api: Arc<dyn MessagingApi>,
    cache: SharedCache,
    events: EventBus,
    dialog_limit: u32,
}

impl DirectoryLoader {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        cache: SharedCache,
        events: EventBus,
        dialog_limit: u32,
    ) -> Self {
        Self {
            api,
            cache,
            events,
            dialog_limit,
        }
    }

    /// Replace the cached dialog list with the gateway's listing.
    pub async fn load_dialogs(&self, session: &Session) -> Result<usize, SyncError> {
        let dialogs = self
            .api
            .list_dialogs(session, self.dialog_limit)
            .await
            .map_err(|err| self.report_read_failure("dialogs", err))?;

        let count = dialogs.len();
        self.cache.write(|cache| cache.replace_dialogs(dialogs));
        debug!(count, "dialog list replaced");
        self.events.emit(SyncEvent::DialogsChanged);
        Ok(count)
    }

    /// Fetch avatars for the ids not cached yet, in one batch.
    ///
    /// Returns how many avatars were added.
    pub async fn load_avatars(
        &self,
        session: &Session,
        entity_ids: &[EntityId],
    ) -> Result<usize, SyncError> {
        let missing = self.cache.read(|cache| cache.missing_avatars(entity_ids));
        if missing.is_empty() {
            return Ok(0);
        }

        let avatars = self
            .api
            .fetch_avatars(session, &missing)
            .await
            .map_err(|err| self.report_read_failure("avatars", err))?;

        let added = self.cache.write(|cache| cache.merge_avatars(avatars));
        debug!(requested = missing.len(), added, "avatars merged");
        if added > 0 {
            self.events.emit(SyncEvent::AvatarsChanged);
        }
        Ok(added)
    }

    pub async fn load_avatar(
        &self,
        session: &Session,
        entity_id: EntityId,
    ) -> Result<bool, SyncError> {
        self.load_avatars(session, &[entity_id])
            .await
            .map(|added| added > 0)
    }

    fn report_read_failure(&self, resource: &'static str, err: SyncError) -> SyncError {
        warn!(resource, error = %err, "directory fetch failed");
        self.events.emit(SyncEvent::Error {
            code: err.code.clone(),
            message: err.message.clone(),
            recoverable: err.is_recoverable(),
        });
        err
    }
}
