//! Gateway runtime for the tidings sync engine.
//!
//! Wires the cache and router from `tidings-core` to the messaging gateway: a
//! websocket push channel with fixed-delay reconnect, paged history loading, dialog
//! and avatar listing, and confirmed mutations.

pub mod api;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod engine;
pub mod history;
pub mod http;
pub mod transport;

pub use api::{HistoryQuery, MessagingApi, UploadRequest};
pub use config::{ConfigError, GatewayConfig};
pub use directory::DirectoryLoader;
pub use dispatcher::MutationDispatcher;
pub use engine::SyncEngine;
pub use history::{HistoryLoader, PageOutcome};
pub use http::HttpMessagingApi;
pub use transport::{
    FrameSink, FrameStream, PushChannel, PushConnection, PushConnector, PushSender,
    WebSocketConnector, session_endpoint,
};
