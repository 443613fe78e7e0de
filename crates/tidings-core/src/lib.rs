//! Core synchronization model shared by the gateway runtime and presentation code.
//!
//! This crate defines the conversation data model, the push envelope protocol, the
//! entity cache with its idempotent merge operations, the push channel lifecycle, and
//! the router that applies live events to the cache. It performs no I/O.

/// Entity cache and its shared handle.
pub mod cache;
/// Presentation event fan-out.
pub mod channel;
/// Push envelope encoding and decoding.
pub mod envelope;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Fixed-delay reconnect and heartbeat policy.
pub mod retry;
/// Live event routing into the cache.
pub mod router;
/// Push channel lifecycle state machine.
pub mod state_machine;
/// Per-conversation timeline merge buffer.
pub mod timeline;
/// Data model and presentation events.
pub mod types;

pub use cache::{EntityCache, SharedCache};
pub use channel::{EventBus, EventStream};
pub use envelope::{
    DeletedMessages, Envelope, InboundEvent, OutboundEvent, ServerError, decode_inbound,
    encode_outbound,
};
pub use error::{ErrorCategory, SyncError, classify_http_status};
pub use retry::ReconnectPolicy;
pub use router::{LiveEventRouter, RouteOutcome};
pub use state_machine::{ChannelSignal, ChannelStateMachine};
pub use timeline::Timeline;
pub use types::{
    ChannelState, ComposeContext, ConversationId, Dialog, DialogKind, DialogPatch, EntityId,
    MEDIA_PREVIEW, MediaDescriptor, MediaKind, Message, MessageId, MutationAction, Session,
    SyncEvent, UserPresence,
};
