use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::trace;

use crate::{
    timeline::Timeline,
    types::{ComposeContext, ConversationId, Dialog, DialogPatch, EntityId, Message, MessageId},
};

/// In-memory store of dialogs, timelines, avatars and composer context.
///
/// History pages, live events and confirmed mutations all go through the same merge
/// primitives, so the cache holds one reconciled view whatever path delivered the data.
#[derive(Debug, Clone, Default)]
pub struct EntityCache {
    dialogs: Vec<Dialog>,
    timelines: HashMap<ConversationId, Timeline>,
    avatars: HashMap<EntityId, String>,
    active_conversation: Option<ConversationId>,
    compose: Option<(ConversationId, ComposeContext)>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialogs in listing order.
    pub fn dialogs(&self) -> &[Dialog] {
        &self.dialogs
    }

    pub fn dialog(&self, id: ConversationId) -> Option<&Dialog> {
        self.dialogs.iter().find(|dialog| dialog.id == id)
    }

    /// Replace the dialog list, keeping the first entry for each id.
    pub fn replace_dialogs(&mut self, dialogs: Vec<Dialog>) {
        let mut seen = HashSet::with_capacity(dialogs.len());
        self.dialogs = dialogs
            .into_iter()
            .filter(|dialog| seen.insert(dialog.id))
            .collect();
    }

    /// Shallow-merge `patch` into a known dialog.
    ///
    /// Unknown dialogs are not fabricated; returns whether a dialog was updated.
    pub fn update_dialog_summary(&mut self, dialog_id: ConversationId, patch: &DialogPatch) -> bool {
        match self.dialogs.iter_mut().find(|dialog| dialog.id == dialog_id) {
            Some(dialog) => {
                patch.apply_to(dialog);
                true
            }
            None => {
                trace!(dialog_id, "dialog summary update for unknown dialog ignored");
                false
            }
        }
    }

    /// Point the owning dialog's preview at `message`, whichever path delivered it.
    ///
    /// A message older than the dialog's current last message does not regress the
    /// preview. Returns whether the dialog changed.
    pub fn record_last_message(&mut self, message: &Message) -> bool {
        let Some(dialog) = self
            .dialogs
            .iter_mut()
            .find(|dialog| dialog.id == message.conversation_id)
        else {
            return false;
        };
        if dialog
            .last_message_at
            .is_some_and(|current| current > message.timestamp)
        {
            return false;
        }

        let patch = DialogPatch::last_message(message);
        if dialog.last_message_preview == patch.last_message_preview
            && dialog.last_message_at == patch.last_message_at
        {
            return false;
        }
        patch.apply_to(dialog);
        true
    }

    pub fn timeline(&self, conversation_id: ConversationId) -> Option<&Timeline> {
        self.timelines.get(&conversation_id)
    }

    /// Timeline ids newest-first; empty when nothing is loaded.
    pub fn timeline_ids(&self, conversation_id: ConversationId) -> Vec<MessageId> {
        self.timeline(conversation_id)
            .map(Timeline::ids)
            .unwrap_or_default()
    }

    pub fn oldest_message_id(&self, conversation_id: ConversationId) -> Option<MessageId> {
        self.timeline(conversation_id)
            .and_then(Timeline::oldest)
            .map(|message| message.id)
    }

    /// Fully replace a conversation's timeline after a fresh fetch.
    pub fn replace_timeline(&mut self, conversation_id: ConversationId, messages: Vec<Message>) {
        self.timelines
            .insert(conversation_id, Timeline::from_newest_first(messages));
    }

    /// Append an older page; returns how many messages were new.
    pub fn merge_older(&mut self, conversation_id: ConversationId, messages: Vec<Message>) -> usize {
        self.timelines
            .entry(conversation_id)
            .or_default()
            .merge_older(messages)
    }

    /// Insert a live or just-sent message; a known id is a no-op.
    pub fn merge_newest(&mut self, conversation_id: ConversationId, message: Message) -> bool {
        self.timelines
            .entry(conversation_id)
            .or_default()
            .merge_newest(message)
    }

    /// Replace a stored message in place; unknown ids (or unloaded conversations) are a no-op.
    pub fn update(&mut self, conversation_id: ConversationId, message: Message) -> bool {
        self.timelines
            .get_mut(&conversation_id)
            .is_some_and(|timeline| timeline.update(message))
    }

    /// Remove messages by id; returns how many were present.
    pub fn remove_by_ids(&mut self, conversation_id: ConversationId, ids: &[MessageId]) -> usize {
        self.timelines
            .get_mut(&conversation_id)
            .map_or(0, |timeline| timeline.remove_ids(ids))
    }

    pub fn avatars(&self) -> &HashMap<EntityId, String> {
        &self.avatars
    }

    pub fn avatar(&self, entity_id: EntityId) -> Option<&str> {
        self.avatars.get(&entity_id).map(String::as_str)
    }

    /// Ids from `entity_ids` that have no cached avatar yet, first occurrence order.
    pub fn missing_avatars(&self, entity_ids: &[EntityId]) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        entity_ids
            .iter()
            .copied()
            .filter(|id| !self.avatars.contains_key(id) && seen.insert(*id))
            .collect()
    }

    /// Add fetched avatars; returns how many entries were added or changed.
    pub fn merge_avatars(&mut self, avatars: HashMap<EntityId, String>) -> usize {
        let mut changed = 0;
        for (entity_id, payload) in avatars {
            if self.avatars.get(&entity_id) != Some(&payload) {
                self.avatars.insert(entity_id, payload);
                changed += 1;
            }
        }
        changed
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active_conversation
    }

    /// Switch the active conversation. Any reply/edit context is dropped.
    pub fn set_active_conversation(&mut self, conversation_id: Option<ConversationId>) {
        if self.active_conversation != conversation_id {
            self.compose = None;
        }
        self.active_conversation = conversation_id;
    }

    /// Reply or edit target attached to the composer of `conversation_id`.
    pub fn compose_context(&self, conversation_id: ConversationId) -> Option<ComposeContext> {
        self.compose
            .filter(|(id, _)| *id == conversation_id)
            .map(|(_, context)| context)
    }

    /// Attach a reply or edit target; it replaces whatever target was set before.
    pub fn set_compose_context(&mut self, conversation_id: ConversationId, context: ComposeContext) {
        self.compose = Some((conversation_id, context));
    }

    pub fn clear_compose_context(&mut self, conversation_id: ConversationId) {
        if self.compose.is_some_and(|(id, _)| id == conversation_id) {
            self.compose = None;
        }
    }

    /// Drop everything; used on logout.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Shared handle to the [`EntityCache`].
///
/// Each closure runs under the lock to completion, so mutations never interleave and
/// readers never observe a partial write. Closures must not block or await.
#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    inner: Arc<RwLock<EntityCache>>,
}

impl SharedCache {
    pub fn new(cache: EntityCache) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cache)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&EntityCache) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut EntityCache) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Copy of the current state for presentation code.
    pub fn snapshot(&self) -> EntityCache {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::types::DialogKind;

    fn message(conversation_id: ConversationId, id: MessageId) -> Message {
        Message {
            id,
            conversation_id,
            sender_id: None,
            sender_name: None,
            text: Some(format!("message {id}")),
            timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            outgoing: false,
            reply_to: None,
            media_kind: None,
            media_info: None,
            edited: false,
            views: None,
            forwards: None,
        }
    }

    fn page(conversation_id: ConversationId, ids: &[MessageId]) -> Vec<Message> {
        ids.iter().map(|id| message(conversation_id, *id)).collect()
    }

    fn dialog(id: ConversationId, name: &str) -> Dialog {
        Dialog {
            id,
            name: name.to_owned(),
            kind: DialogKind::Group,
            username: None,
            status: None,
            member_count: Some(3),
            avatar: None,
            last_message_preview: None,
            last_message_at: None,
            unread_count: 0,
            muted: false,
            pinned: false,
        }
    }

    #[test]
    fn remove_by_ids_keeps_order_of_remaining_messages() {
        let mut cache = EntityCache::new();
        cache.replace_timeline(1, page(1, &[9, 7, 5, 1]));

        assert_eq!(cache.remove_by_ids(1, &[5, 7]), 2);
        assert_eq!(cache.timeline_ids(1), vec![9, 1]);
        assert_eq!(cache.remove_by_ids(2, &[5]), 0);
    }

    #[test]
    fn conversations_are_independent_id_spaces() {
        let mut cache = EntityCache::new();
        cache.merge_newest(1, message(1, 10));
        assert!(cache.merge_newest(2, message(2, 10)));

        assert_eq!(cache.timeline_ids(1), vec![10]);
        assert_eq!(cache.timeline_ids(2), vec![10]);
    }

    #[test]
    fn update_for_unloaded_conversation_is_noop() {
        let mut cache = EntityCache::new();
        assert!(!cache.update(5, message(5, 1)));
        assert!(cache.timeline(5).is_none());
    }

    #[test]
    fn last_write_wins_after_overlapping_sources() {
        let mut cache = EntityCache::new();
        cache.replace_timeline(42, page(42, &[100, 99]));
        cache.merge_newest(42, message(42, 101));
        cache.merge_older(42, page(42, &[101, 99, 98]));

        let mut edited = message(42, 101);
        edited.text = Some("edited".into());
        edited.edited = true;
        assert!(cache.update(42, edited));

        assert_eq!(cache.timeline_ids(42), vec![101, 100, 99, 98]);
        let stored = cache
            .timeline(42)
            .and_then(|timeline| timeline.get(101))
            .expect("message 101 should be cached");
        assert_eq!(stored.text.as_deref(), Some("edited"));
    }

    #[test]
    fn replace_timeline_drops_duplicate_ids_in_batch() {
        let mut cache = EntityCache::new();
        cache.replace_timeline(3, page(3, &[5, 4, 5, 3]));
        assert_eq!(cache.timeline_ids(3), vec![5, 4, 3]);
    }

    #[test]
    fn dialog_summary_updates_never_fabricate_dialogs() {
        let mut cache = EntityCache::new();
        cache.replace_dialogs(vec![dialog(1, "one"), dialog(2, "two"), dialog(1, "dup")]);
        assert_eq!(cache.dialogs().len(), 2);

        let patch = DialogPatch::last_message(&message(2, 8));
        assert!(cache.update_dialog_summary(2, &patch));
        assert!(!cache.update_dialog_summary(99, &patch));

        assert_eq!(cache.dialogs().len(), 2);
        assert_eq!(
            cache.dialog(2).and_then(|d| d.last_message_preview.as_deref()),
            Some("message 8")
        );
        assert_eq!(cache.dialog(1).map(|d| d.name.as_str()), Some("one"));
    }

    #[test]
    fn last_message_preview_follows_newest_message_regardless_of_insertion() {
        let mut cache = EntityCache::new();
        cache.replace_dialogs(vec![dialog(42, "team")]);
        cache.replace_timeline(42, page(42, &[101, 100]));

        assert!(cache.record_last_message(&message(42, 101)));
        assert!(!cache.record_last_message(&message(42, 101)));
        assert!(!cache.record_last_message(&message(42, 99)));
        assert!(!cache.record_last_message(&message(7, 5)));

        let dialog = cache.dialog(42).expect("dialog 42 should be cached");
        assert_eq!(dialog.last_message_preview.as_deref(), Some("message 101"));
        assert_eq!(dialog.last_message_at, Some(message(42, 101).timestamp));
    }

    #[test]
    fn avatars_are_merged_and_missing_ids_are_reported_once() {
        let mut cache = EntityCache::new();
        let fetched: HashMap<EntityId, String> =
            serde_json::from_value(json!({ "1": "data:one", "2": "data:two" }))
                .expect("avatar map should decode");
        assert_eq!(cache.merge_avatars(fetched), 2);

        assert_eq!(cache.missing_avatars(&[1, 3, 2, 3, 4]), vec![3, 4]);
        assert_eq!(cache.avatar(2), Some("data:two"));
    }

    #[test]
    fn compose_context_is_exclusive_and_cleared_on_switch() {
        let mut cache = EntityCache::new();
        cache.set_active_conversation(Some(1));
        cache.set_compose_context(1, ComposeContext::Reply(10));
        cache.set_compose_context(1, ComposeContext::Edit(11));
        assert_eq!(cache.compose_context(1), Some(ComposeContext::Edit(11)));

        cache.set_active_conversation(Some(1));
        assert_eq!(cache.compose_context(1), Some(ComposeContext::Edit(11)));

        cache.set_active_conversation(Some(2));
        assert_eq!(cache.compose_context(1), None);
    }

    #[test]
    fn reset_clears_every_collection() {
        let mut cache = EntityCache::new();
        cache.replace_dialogs(vec![dialog(1, "one")]);
        cache.replace_timeline(1, page(1, &[2, 1]));
        cache.merge_avatars(HashMap::from([(1, "data".to_owned())]));
        cache.set_active_conversation(Some(1));

        cache.reset();

        assert!(cache.dialogs().is_empty());
        assert!(cache.timeline(1).is_none());
        assert!(cache.avatars().is_empty());
        assert_eq!(cache.active_conversation(), None);
    }

    #[test]
    fn shared_cache_snapshots_are_detached() {
        let shared = SharedCache::default();
        shared.write(|cache| cache.merge_newest(1, message(1, 1)));
        let snapshot = shared.snapshot();
        shared.write(|cache| cache.merge_newest(1, message(1, 2)));

        assert_eq!(snapshot.timeline_ids(1), vec![1]);
        assert_eq!(shared.read(|cache| cache.timeline_ids(1)), vec![2, 1]);
    }
}
