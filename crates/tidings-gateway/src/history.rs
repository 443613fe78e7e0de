use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tidings_core::{ConversationId, EventBus, MessageId, Session, SharedCache, SyncError, SyncEvent};
use tracing::{debug, warn};

use crate::api::{HistoryQuery, MessagingApi};

/// Result of an older-page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// A page was fetched; `count` messages were new to the timeline.
    Loaded { count: usize },
    /// The conversation has no older history.
    ReachedStart,
    /// Another older-page request for this conversation is still running.
    InFlight,
    /// Nothing to do (no anchor, or the viewport is not near the oldest message).
    NotNeeded,
}

#[derive(Debug, Default)]
struct PaginationTracker {
    in_flight: HashSet<ConversationId>,
    exhausted: HashSet<ConversationId>,
}

enum Claim {
    Granted(PageTicket),
    InFlight,
    Exhausted,
}

/// Releases the in-flight slot when the request finishes or its future is dropped.
struct PageTicket {
    tracker: Arc<Mutex<PaginationTracker>>,
    conversation_id: ConversationId,
}

impl Drop for PageTicket {
    fn drop(&mut self) {
        self.tracker.lock().in_flight.remove(&self.conversation_id);
    }
}

/// Populates timelines from the request/response history endpoint.
#[derive(Clone)]
pub struct HistoryLoader {
    api: Arc<dyn MessagingApi>,
    cache: SharedCache,
    events: EventBus,
    page_size: u16,
    pagination_threshold_px: f32,
    tracker: Arc<Mutex<PaginationTracker>>,
}

impl HistoryLoader {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        cache: SharedCache,
        events: EventBus,
        page_size: u16,
        pagination_threshold_px: f32,
    ) -> Self {
        Self {
            api,
            cache,
            events,
            page_size,
            pagination_threshold_px,
            tracker: Arc::default(),
        }
    }

    /// Fetch the newest page and replace the conversation's timeline with it.
    pub async fn load_initial(
        &self,
        session: &Session,
        conversation_id: ConversationId,
    ) -> Result<usize, SyncError> {
        let page = self
            .api
            .fetch_history(session, conversation_id, HistoryQuery::newest(self.page_size))
            .await
            .map_err(|err| self.report_read_failure(conversation_id, "initial", err))?;

        let count = page.len();
        self.cache
            .write(|cache| cache.replace_timeline(conversation_id, page));
        self.tracker.lock().exhausted.remove(&conversation_id);
        debug!(conversation_id, count, "loaded initial history page");
        self.events
            .emit(SyncEvent::TimelineChanged { conversation_id });
        Ok(count)
    }

    /// Fetch the page strictly older than `before` and merge it at the tail.
    ///
    /// At most one request per conversation runs at a time; a concurrent call returns
    /// [`PageOutcome::InFlight`] without touching the network.
    pub async fn load_older(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        before: MessageId,
    ) -> Result<PageOutcome, SyncError> {
        let _ticket = match self.claim(conversation_id) {
            Claim::Granted(ticket) => ticket,
            Claim::InFlight => {
                debug!(conversation_id, "older page already in flight");
                return Ok(PageOutcome::InFlight);
            }
            Claim::Exhausted => return Ok(PageOutcome::ReachedStart),
        };

        let page = self
            .api
            .fetch_history(
                session,
                conversation_id,
                HistoryQuery::older_than(self.page_size, before),
            )
            .await
            .map_err(|err| self.report_read_failure(conversation_id, "older", err))?;

        if page.is_empty() {
            debug!(conversation_id, before, "reached start of history");
            self.tracker.lock().exhausted.insert(conversation_id);
            return Ok(PageOutcome::ReachedStart);
        }

        let count = self
            .cache
            .write(|cache| cache.merge_older(conversation_id, page));
        if count > 0 {
            self.events
                .emit(SyncEvent::TimelineChanged { conversation_id });
        }
        Ok(PageOutcome::Loaded { count })
    }

    /// Load the next older page when the viewport is within the pagination threshold of
    /// the oldest loaded message.
    pub async fn maybe_load_older(
        &self,
        session: &Session,
        conversation_id: ConversationId,
        scroll_offset_px: f32,
    ) -> Result<PageOutcome, SyncError> {
        if scroll_offset_px >= self.pagination_threshold_px {
            return Ok(PageOutcome::NotNeeded);
        }
        let Some(oldest) = self
            .cache
            .read(|cache| cache.oldest_message_id(conversation_id))
        else {
            return Ok(PageOutcome::NotNeeded);
        };
        self.load_older(session, conversation_id, oldest).await
    }

    pub fn is_exhausted(&self, conversation_id: ConversationId) -> bool {
        self.tracker.lock().exhausted.contains(&conversation_id)
    }

    /// Forget in-flight and end-of-history markers, e.g. on logout.
    pub fn reset(&self) {
        let mut tracker = self.tracker.lock();
        tracker.exhausted.clear();
        tracker.in_flight.clear();
    }

    fn claim(&self, conversation_id: ConversationId) -> Claim {
        let mut tracker = self.tracker.lock();
        if tracker.exhausted.contains(&conversation_id) {
            return Claim::Exhausted;
        }
        if !tracker.in_flight.insert(conversation_id) {
            return Claim::InFlight;
        }
        Claim::Granted(PageTicket {
            tracker: self.tracker.clone(),
            conversation_id,
        })
    }

    fn report_read_failure(
        &self,
        conversation_id: ConversationId,
        page: &'static str,
        err: SyncError,
    ) -> SyncError {
        warn!(conversation_id, page, error = %err, "history fetch failed");
        self.events.emit(SyncEvent::Error {
            code: err.code.clone(),
            message: err.message.clone(),
            recoverable: err.is_recoverable(),
        });
        err
    }
}
