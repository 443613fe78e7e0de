use tracing::{debug, trace, warn};

use crate::{
    cache::SharedCache,
    channel::EventBus,
    envelope::{DeletedMessages, InboundEvent, decode_inbound},
    types::{Message, SyncEvent},
};

/// What the router did with one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The cache changed.
    Applied,
    /// The event was valid but changed nothing (duplicate, unknown id, heartbeat reply).
    Unchanged,
    /// Forwarded to presentation without touching the cache.
    Forwarded,
    /// Unknown or undecodable; logged and dropped.
    Dropped,
}

/// Applies push events to the [`SharedCache`] with the same merge primitives the
/// request/response paths use.
///
/// No ordering between events is assumed: edits and deletes for ids that are not
/// loaded are no-ops, and duplicates of already cached messages are ignored.
#[derive(Debug, Clone)]
pub struct LiveEventRouter {
    cache: SharedCache,
    events: EventBus,
}

impl LiveEventRouter {
    pub fn new(cache: SharedCache, events: EventBus) -> Self {
        Self { cache, events }
    }

    /// Decode and apply one text frame. Decode failures never propagate.
    pub fn route_frame(&self, frame: &str) -> RouteOutcome {
        match decode_inbound(frame) {
            Ok(event) => self.route(event),
            Err(err) => {
                warn!(error = %err, frame_len = frame.len(), "dropping undecodable push frame");
                RouteOutcome::Dropped
            }
        }
    }

    pub fn route(&self, event: InboundEvent) -> RouteOutcome {
        trace!(event = event.name(), "routing push event");
        match event {
            InboundEvent::NewMessage(message) => self.apply_new_message(message),
            InboundEvent::MessageEdited(message) => self.apply_edit(message),
            InboundEvent::MessagesDeleted(deleted) => self.apply_deletion(deleted),
            InboundEvent::UserUpdate(presence) => {
                self.events.emit(SyncEvent::Presence(presence));
                RouteOutcome::Forwarded
            }
            InboundEvent::Pong => RouteOutcome::Unchanged,
            InboundEvent::ServerError(server_error) => {
                let action = server_error.action.as_deref().unwrap_or("unknown");
                warn!(action, error = %server_error.error, "gateway reported channel action failure");
                self.events.emit(SyncEvent::Error {
                    code: format!("remote_{action}_failed"),
                    message: server_error.error,
                    recoverable: false,
                });
                RouteOutcome::Forwarded
            }
            InboundEvent::Unknown { event } => {
                debug!(%event, "ignoring unknown push event");
                RouteOutcome::Dropped
            }
        }
    }

    fn apply_new_message(&self, message: Message) -> RouteOutcome {
        let conversation_id = message.conversation_id;
        let (inserted, dialog_updated) = self.cache.write(|cache| {
            // A history page may have cached the message already; the preview still moves.
            let dialog_updated = cache.record_last_message(&message);
            let inserted = cache.merge_newest(conversation_id, message);
            (inserted, dialog_updated)
        });

        if dialog_updated {
            self.events.emit(SyncEvent::DialogsChanged);
        }
        if inserted {
            self.events.emit(SyncEvent::TimelineChanged { conversation_id });
        } else {
            trace!(conversation_id, "pushed message already cached");
        }
        if inserted || dialog_updated {
            RouteOutcome::Applied
        } else {
            RouteOutcome::Unchanged
        }
    }

    fn apply_edit(&self, message: Message) -> RouteOutcome {
        let conversation_id = message.conversation_id;
        let message_id = message.id;
        if self.cache.write(|cache| cache.update(conversation_id, message)) {
            self.events.emit(SyncEvent::TimelineChanged { conversation_id });
            RouteOutcome::Applied
        } else {
            trace!(conversation_id, message_id, "edit for message not loaded locally");
            RouteOutcome::Unchanged
        }
    }

    fn apply_deletion(&self, deleted: DeletedMessages) -> RouteOutcome {
        let Some(conversation_id) = deleted.conversation_id else {
            warn!(
                count = deleted.message_ids.len(),
                "dropping deletion without chat id"
            );
            return RouteOutcome::Dropped;
        };

        let removed = self
            .cache
            .write(|cache| cache.remove_by_ids(conversation_id, &deleted.message_ids));
        if removed > 0 {
            self.events.emit(SyncEvent::TimelineChanged { conversation_id });
            RouteOutcome::Applied
        } else {
            RouteOutcome::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::channel::EventStream;

    fn setup() -> (LiveEventRouter, SharedCache, EventStream) {
        let cache = SharedCache::default();
        let events = EventBus::new(32);
        let stream = events.subscribe();
        (LiveEventRouter::new(cache.clone(), events), cache, stream)
    }

    fn message_frame(event: &str, chat_id: i64, id: i64, text: &str) -> String {
        json!({
            "event": event,
            "data": {
                "id": id, "chat_id": chat_id, "text": text,
                "date": format!("2024-05-01T08:00:{:02}+00:00", id % 60),
                "is_outgoing": false, "is_edited": event == "message_edited"
            }
        })
        .to_string()
    }

    fn seed_dialog(cache: &SharedCache, id: i64) {
        let dialog = serde_json::from_value(json!({
            "id": id, "name": "Team", "type": "group", "unread_count": 0
        }))
        .expect("dialog should decode");
        cache.write(|c| c.replace_dialogs(vec![dialog]));
    }

    #[test]
    fn new_message_updates_timeline_and_dialog_preview() {
        let (router, cache, mut events) = setup();
        seed_dialog(&cache, 42);

        let outcome = router.route_frame(&message_frame("new_message", 42, 7, "hello"));

        assert_eq!(outcome, RouteOutcome::Applied);
        assert_eq!(cache.read(|c| c.timeline_ids(42)), vec![7]);
        assert_eq!(
            cache.read(|c| c.dialog(42).and_then(|d| d.last_message_preview.clone())),
            Some("hello".to_owned())
        );
        assert_eq!(events.try_recv().ok(), Some(SyncEvent::DialogsChanged));
        assert_eq!(
            events.try_recv().ok(),
            Some(SyncEvent::TimelineChanged { conversation_id: 42 })
        );
    }

    #[test]
    fn duplicate_push_is_applied_once() {
        let (router, cache, _events) = setup();
        let frame = message_frame("new_message", 42, 7, "hello");

        assert_eq!(router.route_frame(&frame), RouteOutcome::Applied);
        assert_eq!(router.route_frame(&frame), RouteOutcome::Unchanged);
        assert_eq!(cache.read(|c| c.timeline_ids(42)), vec![7]);
    }

    #[test]
    fn push_for_message_already_paged_in_still_moves_dialog_preview() {
        let (router, cache, mut events) = setup();
        seed_dialog(&cache, 42);
        let frame = message_frame("new_message", 42, 9, "fetched first");
        let InboundEvent::NewMessage(fetched) = decode_inbound(&frame).expect("frame should decode")
        else {
            panic!("expected a new_message event");
        };
        cache.write(|c| c.replace_timeline(42, vec![fetched]));

        assert_eq!(router.route_frame(&frame), RouteOutcome::Applied);

        assert_eq!(cache.read(|c| c.timeline_ids(42)), vec![9]);
        assert_eq!(
            cache.read(|c| c.dialog(42).and_then(|d| d.last_message_preview.clone())),
            Some("fetched first".to_owned())
        );
        assert_eq!(events.try_recv().ok(), Some(SyncEvent::DialogsChanged));
        assert!(events.try_recv().is_err(), "timeline did not change");
    }

    #[test]
    fn edit_for_unknown_message_leaves_timeline_unchanged() {
        let (router, cache, _events) = setup();
        router.route_frame(&message_frame("new_message", 42, 1, "one"));

        let outcome = router.route_frame(&message_frame("message_edited", 42, 2, "ghost"));

        assert_eq!(outcome, RouteOutcome::Unchanged);
        assert_eq!(cache.read(|c| c.timeline_ids(42)), vec![1]);
    }

    #[test]
    fn edit_replaces_known_message() {
        let (router, cache, _events) = setup();
        router.route_frame(&message_frame("new_message", 42, 1, "one"));

        router.route_frame(&message_frame("message_edited", 42, 1, "uno"));

        let text = cache.read(|c| {
            c.timeline(42)
                .and_then(|t| t.get(1))
                .and_then(|m| m.text.clone())
        });
        assert_eq!(text.as_deref(), Some("uno"));
    }

    #[test]
    fn deletion_removes_listed_ids_only() {
        let (router, cache, _events) = setup();
        for id in [1, 5, 7, 9] {
            router.route_frame(&message_frame("new_message", 42, id, "x"));
        }

        let outcome = router.route_frame(
            &json!({ "event": "message_deleted", "data": { "chat_id": 42, "message_ids": [5, 7] } })
                .to_string(),
        );

        assert_eq!(outcome, RouteOutcome::Applied);
        assert_eq!(cache.read(|c| c.timeline_ids(42)), vec![9, 1]);
    }

    #[test]
    fn deletion_without_chat_id_is_dropped() {
        let (router, cache, _events) = setup();
        router.route_frame(&message_frame("new_message", 42, 5, "x"));

        let outcome = router
            .route_frame(r#"{"event":"message_deleted","data":{"chat_id":null,"message_ids":[5]}}"#);

        assert_eq!(outcome, RouteOutcome::Dropped);
        assert_eq!(cache.read(|c| c.timeline_ids(42)), vec![5]);
    }

    #[test]
    fn presence_is_forwarded_not_cached() {
        let (router, cache, mut events) = setup();
        let outcome = router.route_frame(
            r#"{"event":"user_update","data":{"user_id":9,"online":true,"last_seen":null}}"#,
        );

        assert_eq!(outcome, RouteOutcome::Forwarded);
        match events.try_recv().expect("presence event should be emitted") {
            SyncEvent::Presence(presence) => {
                assert_eq!(presence.user_id, 9);
                assert!(presence.online);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(cache.read(|c| c.dialogs().is_empty()));
    }

    #[test]
    fn garbage_heartbeat_and_unknown_frames_do_not_touch_cache() {
        let (router, cache, mut events) = setup();

        assert_eq!(router.route_frame("{oops"), RouteOutcome::Dropped);
        assert_eq!(router.route_frame(r#"{"event":"pong","data":{}}"#), RouteOutcome::Unchanged);
        assert_eq!(
            router.route_frame(r#"{"event":"chat_action","data":{}}"#),
            RouteOutcome::Dropped
        );

        assert!(cache.read(|c| c.timeline(42).is_none()));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn server_errors_surface_as_error_events() {
        let (router, _cache, mut events) = setup();
        router.route_frame(r#"{"event":"error","data":{"action":"send_message","error":"flood"}}"#);

        match events.try_recv().expect("error event should be emitted") {
            SyncEvent::Error { code, message, .. } => {
                assert_eq!(code, "remote_send_message_failed");
                assert_eq!(message, "flood");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
