#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::{StreamExt, channel::mpsc as fmpsc, future};
use parking_lot::Mutex;
use serde_json::json;
use tidings_core::{
    ChannelState, ConversationId, Dialog, EntityId, ErrorCategory, EventStream, MediaKind, Message,
    MessageId, Session, SyncError, SyncEvent,
};
use tidings_gateway::{
    GatewayConfig, HistoryQuery, MessagingApi, PushConnection, PushConnector, SyncEngine,
    UploadRequest,
};
use tokio::{
    sync::{Notify, Semaphore, broadcast::error::RecvError, mpsc, watch},
    time::{self, Instant},
};
use url::Url;

pub const CONVERSATION: ConversationId = 42;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn session() -> Session {
    Session::authenticated("sess-1")
}

fn timestamp(id: MessageId) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_550_400 + id, 0)
        .single()
        .expect("valid timestamp")
}

pub fn message(conversation_id: ConversationId, id: MessageId) -> Message {
    Message {
        id,
        conversation_id,
        sender_id: Some(7),
        sender_name: Some("Alice".into()),
        text: Some(format!("message {id}")),
        timestamp: timestamp(id),
        outgoing: false,
        reply_to: None,
        media_kind: None,
        media_info: None,
        edited: false,
        views: None,
        forwards: None,
    }
}

pub fn page(ids: &[MessageId]) -> Vec<Message> {
    ids.iter().map(|id| message(CONVERSATION, *id)).collect()
}

pub fn dialog(id: ConversationId, name: &str) -> Dialog {
    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "type": "group",
        "last_message": "earlier",
        "unread_count": 2
    }))
    .expect("dialog fixture should decode")
}

pub fn new_message_frame(message: &Message) -> String {
    json!({ "event": "new_message", "data": message }).to_string()
}

pub fn edited_frame(message: &Message) -> String {
    json!({ "event": "message_edited", "data": message }).to_string()
}

pub fn deleted_frame(conversation_id: ConversationId, ids: &[MessageId]) -> String {
    json!({ "event": "message_deleted", "data": { "chat_id": conversation_id, "message_ids": ids } })
        .to_string()
}

/// Requests observed by [`FakeApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Dialogs { limit: u32 },
    History { conversation_id: ConversationId, query: HistoryQuery },
    Send { conversation_id: ConversationId, text: String, reply_to: Option<MessageId> },
    Edit { conversation_id: ConversationId, message_id: MessageId, text: String },
    Delete { conversation_id: ConversationId, message_ids: Vec<MessageId> },
    Avatars(Vec<EntityId>),
    Upload { conversation_id: ConversationId, file_name: String },
    Logout,
}

/// Holds history fetches until released.
pub struct HistoryGate {
    pub entered: Notify,
    pub release: Semaphore,
}

impl HistoryGate {
    fn closed() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

/// Scripted in-memory gateway.
#[derive(Default)]
pub struct FakeApi {
    dialogs: Mutex<Vec<Dialog>>,
    avatars: Mutex<HashMap<EntityId, String>>,
    pages: Mutex<VecDeque<Vec<Message>>>,
    stored: Mutex<HashMap<(ConversationId, MessageId), Message>>,
    failures: Mutex<VecDeque<SyncError>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI64,
    gate: Mutex<Option<Arc<HistoryGate>>>,
}

impl FakeApi {
    pub fn with_dialogs(&self, dialogs: Vec<Dialog>) {
        *self.dialogs.lock() = dialogs;
    }

    pub fn with_avatar(&self, entity_id: EntityId, payload: &str) {
        self.avatars.lock().insert(entity_id, payload.to_owned());
    }

    /// Queue a history page; pages are served in order, then empty pages.
    pub fn queue_page(&self, messages: Vec<Message>) {
        let mut stored = self.stored.lock();
        for message in &messages {
            stored.insert((message.conversation_id, message.id), message.clone());
        }
        self.pages.lock().push_back(messages);
    }

    /// The next request of any kind fails with `error`.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    pub fn gate_history(&self) -> Arc<HistoryGate> {
        let gate = Arc::new(HistoryGate::closed());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn history_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::History { .. }))
            .count()
    }

    fn record(&self, call: Call) -> Result<(), SyncError> {
        self.calls.lock().push(call);
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_message(&self, conversation_id: ConversationId) -> Message {
        let id = 1_000 + self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = message(conversation_id, id);
        message.outgoing = true;
        message.sender_name = Some("Me".into());
        message
    }
}

pub fn gateway_error(code: &str) -> SyncError {
    SyncError::new(ErrorCategory::Network, code, "gateway unavailable")
}

#[async_trait]
impl MessagingApi for FakeApi {
    async fn list_dialogs(&self, _: &Session, limit: u32) -> Result<Vec<Dialog>, SyncError> {
        self.record(Call::Dialogs { limit })?;
        Ok(self.dialogs.lock().clone())
    }

    async fn fetch_history(
        &self,
        _: &Session,
        conversation_id: ConversationId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, SyncError> {
        self.record(Call::History {
            conversation_id,
            query,
        })?;

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release
                .acquire()
                .await
                .expect("gate semaphore stays open")
                .forget();
        }

        Ok(self.pages.lock().pop_front().unwrap_or_default())
    }

    async fn send_message(
        &self,
        _: &Session,
        conversation_id: ConversationId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, SyncError> {
        self.record(Call::Send {
            conversation_id,
            text: text.to_owned(),
            reply_to,
        })?;
        let mut message = self.next_message(conversation_id);
        message.text = Some(text.to_owned());
        message.reply_to = reply_to;
        self.stored
            .lock()
            .insert((conversation_id, message.id), message.clone());
        Ok(message)
    }

    async fn edit_message(
        &self,
        _: &Session,
        conversation_id: ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, SyncError> {
        self.record(Call::Edit {
            conversation_id,
            message_id,
            text: text.to_owned(),
        })?;
        let mut stored = self.stored.lock();
        let message = stored
            .get_mut(&(conversation_id, message_id))
            .ok_or_else(|| {
                SyncError::new(ErrorCategory::Config, "edit_failed", "message not found")
            })?;
        message.text = Some(text.to_owned());
        message.edited = true;
        Ok(message.clone())
    }

    async fn delete_messages(
        &self,
        _: &Session,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), SyncError> {
        self.record(Call::Delete {
            conversation_id,
            message_ids: message_ids.to_vec(),
        })?;
        let mut stored = self.stored.lock();
        for id in message_ids {
            stored.remove(&(conversation_id, *id));
        }
        Ok(())
    }

    async fn fetch_avatars(
        &self,
        _: &Session,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, String>, SyncError> {
        self.record(Call::Avatars(entity_ids.to_vec()))?;
        let avatars = self.avatars.lock();
        Ok(entity_ids
            .iter()
            .filter_map(|id| avatars.get(id).map(|payload| (*id, payload.clone())))
            .collect())
    }

    async fn upload_file(&self, _: &Session, upload: UploadRequest) -> Result<Message, SyncError> {
        self.record(Call::Upload {
            conversation_id: upload.conversation_id,
            file_name: upload.file_name.clone(),
        })?;
        let mut message = self.next_message(upload.conversation_id);
        message.text = upload.caption;
        message.reply_to = upload.reply_to;
        message.media_kind = Some(MediaKind::Document);
        message.media_info = Some(upload.file_name);
        Ok(message)
    }

    async fn logout(&self, _: &Session) -> Result<(), SyncError> {
        self.record(Call::Logout)
    }
}

/// Server half of one fake push connection.
pub struct FakeServer {
    to_client: fmpsc::UnboundedSender<Result<String, SyncError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl FakeServer {
    pub fn push(&self, frame: String) {
        self.to_client
            .unbounded_send(Ok(frame))
            .expect("client side should still be connected");
    }

    /// Next frame the client sent, if any is queued.
    pub fn try_received(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    pub fn received_all(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_received()).collect()
    }

    /// Simulate the peer going away.
    pub fn disconnect(self) {}
}

/// Hands out queued fake connections; refuses when none is queued.
#[derive(Default)]
pub struct FakeConnector {
    ready: Mutex<VecDeque<PushConnection>>,
    attempts: Mutex<Vec<(Instant, Url)>>,
}

impl FakeConnector {
    /// Queue a connection for the next attempt and return its server half.
    pub fn accept_next(&self) -> FakeServer {
        let (to_client, frames) = fmpsc::unbounded::<Result<String, SyncError>>();
        let (outbound, from_client) = mpsc::unbounded_channel::<String>();
        let sink = futures::sink::unfold(
            outbound,
            |outbound: mpsc::UnboundedSender<String>, frame: String| {
                let sent = outbound.send(frame).map(|()| outbound).map_err(|err| {
                    SyncError::new(
                        ErrorCategory::Network,
                        "push_connection_closed",
                        err.to_string(),
                    )
                });
                future::ready(sent)
            },
        );

        self.ready.lock().push_back(PushConnection {
            frames: frames.boxed(),
            sink: Box::pin(sink),
        });
        FakeServer {
            to_client,
            from_client,
        }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn attempt_urls(&self) -> Vec<Url> {
        self.attempts.lock().iter().map(|(_, url)| url.clone()).collect()
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<PushConnection, SyncError> {
        self.attempts.lock().push((Instant::now(), url.clone()));
        self.ready.lock().pop_front().ok_or_else(|| {
            SyncError::new(
                ErrorCategory::Network,
                "push_transport_error",
                "connection refused",
            )
        })
    }
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub api: Arc<FakeApi>,
    pub connector: Arc<FakeConnector>,
}

impl Harness {
    pub fn new() -> Self {
        let config = GatewayConfig::from_lookup(|_| None).expect("default config should parse");
        let api = Arc::new(FakeApi::default());
        let connector = Arc::new(FakeConnector::default());
        let engine = Arc::new(SyncEngine::with_parts(
            &config,
            api.clone(),
            connector.clone(),
        ));
        Self {
            engine,
            api,
            connector,
        }
    }

    /// Start the engine with one accepted connection and wait until it is open.
    pub async fn start_open(&self) -> FakeServer {
        let server = self.connector.accept_next();
        self.engine
            .start(session())
            .await
            .expect("engine should start");
        wait_for_state(&mut self.engine.watch_channel_state(), ChannelState::Open).await;
        server
    }

    pub fn timeline(&self) -> Vec<MessageId> {
        self.engine
            .cache()
            .read(|cache| cache.timeline_ids(CONVERSATION))
    }
}

pub async fn wait_for_state(state: &mut watch::Receiver<ChannelState>, expected: ChannelState) {
    time::timeout(Duration::from_secs(120), state.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("channel never reached {expected:?}"))
        .expect("channel state sender should be alive");
}

pub async fn next_event_matching(
    events: &mut EventStream,
    matches: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("expected event should arrive")
}

pub async fn timeline_changed(events: &mut EventStream) {
    next_event_matching(events, |event| {
        matches!(event, SyncEvent::TimelineChanged { conversation_id } if *conversation_id == CONVERSATION)
    })
    .await;
}
