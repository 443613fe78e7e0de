use std::collections::HashSet;

use crate::types::{Message, MessageId};

/// Per-conversation message sequence, stored newest-first.
///
/// Every mutation keeps message ids unique, so pagination pages, pushed messages and
/// local sends can arrive in any order without producing duplicates.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    items: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a timeline from a newest-first batch, keeping the first copy of each id.
    pub fn from_newest_first(messages: Vec<Message>) -> Self {
        let mut timeline = Self::new();
        timeline.merge_older(messages);
        timeline
    }

    /// Stored items, newest first.
    pub fn items(&self) -> &[Message] {
        &self.items
    }

    /// Items in display order, oldest first.
    pub fn oldest_first(&self) -> impl Iterator<Item = &Message> {
        self.items.iter().rev()
    }

    /// Ids in storage order, newest first.
    pub fn ids(&self) -> Vec<MessageId> {
        self.items.iter().map(|message| message.id).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        if !self.contains(id) {
            return None;
        }
        self.items.iter().find(|message| message.id == id)
    }

    pub fn newest(&self) -> Option<&Message> {
        self.items.first()
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.items.last()
    }

    /// Append older messages after the existing tail, skipping ids already present.
    ///
    /// Returns how many messages were appended.
    pub fn merge_older(&mut self, messages: Vec<Message>) -> usize {
        let before = self.items.len();
        for message in messages {
            if self.ids.insert(message.id) {
                self.items.push(message);
            }
        }
        self.items.len() - before
    }

    /// Insert a pushed or just-sent message at its newest-first position.
    ///
    /// A message whose id is already stored is ignored. Returns whether it was inserted.
    pub fn merge_newest(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }

        let key = message.order_key();
        let index = self
            .items
            .iter()
            .position(|existing| existing.order_key() < key)
            .unwrap_or(self.items.len());
        self.items.insert(index, message);
        true
    }

    /// Replace the stored message with the same id in place.
    ///
    /// Returns `false` when the id is unknown.
    pub fn update(&mut self, message: Message) -> bool {
        if !self.contains(message.id) {
            return false;
        }
        match self.items.iter_mut().find(|it| it.id == message.id) {
            Some(existing) => {
                *existing = message;
                true
            }
            None => false,
        }
    }

    /// Remove every message whose id is listed. Returns how many were removed.
    pub fn remove_ids(&mut self, ids: &[MessageId]) -> usize {
        let targets: HashSet<MessageId> = ids
            .iter()
            .copied()
            .filter(|id| self.ids.contains(id))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        self.items.retain(|message| !targets.contains(&message.id));
        for id in &targets {
            self.ids.remove(id);
        }
        targets.len()
    }

    /// Clamp a requested page size against the gateway cap.
    ///
    /// The result is always in `1..=cap` and never above 200.
    pub fn bounded_page_size(requested: u16, cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = cap.max(1);
        safe_requested.min(safe_cap).min(200)
    }
}
