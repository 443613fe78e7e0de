use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Backend-assigned conversation (dialog) identifier.
pub type ConversationId = i64;
/// Message identifier, unique only within its conversation.
pub type MessageId = i64;
/// User or dialog identifier used for avatar lookups.
pub type EntityId = i64;

/// Authenticated backend session produced by the login flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Opaque session handle sent with every request and push connection.
    pub handle: String,
    /// Whether the handle is currently authenticated.
    pub authenticated: bool,
}

impl Session {
    /// Session handle for an already authenticated login.
    pub fn authenticated(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            authenticated: true,
        }
    }
}

/// Kind of conversation a dialog represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    /// One-to-one chat with a user (`"user"` on the wire).
    #[serde(rename = "user", alias = "direct")]
    Direct,
    /// Basic group.
    Group,
    /// Large group.
    Supergroup,
    /// Broadcast channel.
    Channel,
}

/// Conversation summary shown in the dialog list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dialog {
    pub id: ConversationId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DialogKind,
    #[serde(default)]
    pub username: Option<String>,
    /// Presence line for direct dialogs, e.g. `online`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "members_count", default)]
    pub member_count: Option<u32>,
    /// Inline avatar payload when the listing already carries one.
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(rename = "last_message", default)]
    pub last_message_preview: Option<String>,
    #[serde(rename = "last_message_date", default, with = "wire_time::option")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(rename = "unread_count", default)]
    pub unread_count: u32,
    #[serde(rename = "is_muted", default)]
    pub muted: bool,
    #[serde(rename = "is_pinned", default)]
    pub pinned: bool,
}

/// Partial dialog fields applied by [`crate::EntityCache::update_dialog_summary`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogPatch {
    pub name: Option<String>,
    pub status: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: Option<u32>,
    pub muted: Option<bool>,
    pub pinned: Option<bool>,
}

impl DialogPatch {
    /// Patch carrying the preview and date of a freshly arrived message.
    pub fn last_message(message: &Message) -> Self {
        Self {
            last_message_preview: Some(message.preview_text()),
            last_message_at: Some(message.timestamp),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow-merge every present field into `dialog`.
    pub fn apply_to(&self, dialog: &mut Dialog) {
        if let Some(name) = &self.name {
            dialog.name = name.clone();
        }
        if let Some(status) = &self.status {
            dialog.status = Some(status.clone());
        }
        if let Some(preview) = &self.last_message_preview {
            dialog.last_message_preview = Some(preview.clone());
        }
        if let Some(at) = self.last_message_at {
            dialog.last_message_at = Some(at);
        }
        if let Some(unread) = self.unread_count {
            dialog.unread_count = unread;
        }
        if let Some(muted) = self.muted {
            dialog.muted = muted;
        }
        if let Some(pinned) = self.pinned {
            dialog.pinned = pinned;
        }
    }
}

/// Attachment kind reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Voice,
    Sticker,
    VideoNote,
    Audio,
    #[serde(other)]
    Other,
}

/// Media attached to a message: its kind plus opaque backend info (file name etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaDescriptor<'a> {
    pub kind: MediaKind,
    pub info: Option<&'a str>,
}

/// One message of a conversation timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "chat_id")]
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub sender_id: Option<EntityId>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "date", with = "wire_time")]
    pub timestamp: DateTime<Utc>,
    /// Authored by the local user.
    #[serde(rename = "is_outgoing", default)]
    pub outgoing: bool,
    #[serde(rename = "reply_to_msg_id", default)]
    pub reply_to: Option<MessageId>,
    #[serde(rename = "media_type", default)]
    pub media_kind: Option<MediaKind>,
    #[serde(default)]
    pub media_info: Option<String>,
    #[serde(rename = "is_edited", default)]
    pub edited: bool,
    #[serde(default)]
    pub views: Option<u64>,
    #[serde(default)]
    pub forwards: Option<u64>,
}

impl Message {
    /// Key used to order messages inside a timeline: timestamp, then id.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.timestamp, self.id)
    }

    pub fn media(&self) -> Option<MediaDescriptor<'_>> {
        self.media_kind.map(|kind| MediaDescriptor {
            kind,
            info: self.media_info.as_deref(),
        })
    }

    /// Dialog-list preview for this message; media-only messages show `[Media]`.
    pub fn preview_text(&self) -> String {
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_owned(),
            _ => MEDIA_PREVIEW.to_owned(),
        }
    }
}

/// Preview shown for messages without text.
pub const MEDIA_PREVIEW: &str = "[Media]";

/// Presence update for a user, forwarded to presentation and never cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPresence {
    pub user_id: EntityId,
    #[serde(default)]
    pub online: bool,
    #[serde(default, with = "wire_time::option")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Reply or edit target currently attached to the composer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComposeContext {
    Reply(MessageId),
    Edit(MessageId),
}

/// Push channel connection state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No connection has been requested yet.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// Connection is live; sends are delivered.
    Open,
    /// Connection dropped; waiting for the fixed reconnect delay.
    Reconnecting,
    /// Torn down on logout or session loss; no reconnect is scheduled.
    Closed,
}

/// Mutation kinds reported in [`SyncEvent::MutationFailed`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Send,
    Edit,
    Delete,
    Upload,
}

/// Notifications published to presentation code.
///
/// Consumers re-read the cache snapshot after a change notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncEvent {
    /// Push channel transitioned.
    ChannelState { state: ChannelState },
    /// Dialog list or one of its summaries changed.
    DialogsChanged,
    /// Timeline of a conversation changed.
    TimelineChanged { conversation_id: ConversationId },
    /// New avatars were cached.
    AvatarsChanged,
    /// Presence update for a user.
    Presence(UserPresence),
    /// General (non-mutation) error state.
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    /// A user-initiated mutation failed; the cache was left unchanged.
    MutationFailed {
        action: MutationAction,
        conversation_id: ConversationId,
        error: SyncError,
    },
}

/// ISO-8601 timestamps as produced by the gateway.
///
/// Values without an offset are read as UTC and a `null` date maps to the Unix epoch.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(raw) => parse(&raw).map_err(D::Error::custom),
            None => Ok(DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    pub(crate) fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|err| format!("invalid timestamp '{raw}': {err}"))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => serializer.serialize_some(&value.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|raw| super::parse(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}
