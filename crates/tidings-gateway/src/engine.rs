use std::sync::Arc;

use parking_lot::RwLock;
use tidings_core::{
    ChannelState, ComposeContext, ConversationId, EntityId, EventBus, EventStream, LiveEventRouter,
    Message, MessageId, Session, SharedCache, SyncError, SyncEvent,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    api::{MessagingApi, UploadRequest},
    config::GatewayConfig,
    directory::DirectoryLoader,
    dispatcher::MutationDispatcher,
    history::{HistoryLoader, PageOutcome},
    http::HttpMessagingApi,
    transport::{PushChannel, PushConnector, WebSocketConnector},
};

/// Entry point for presentation code: owns the cache, the push channel and the
/// request/response collaborators for one signed-in session at a time.
pub struct SyncEngine {
    api: Arc<dyn MessagingApi>,
    cache: SharedCache,
    events: EventBus,
    channel: PushChannel,
    history: HistoryLoader,
    directory: DirectoryLoader,
    dispatcher: MutationDispatcher,
    session: RwLock<Option<Session>>,
}

impl SyncEngine {
    /// Engine talking HTTP and websockets to the configured gateway.
    pub fn new(config: &GatewayConfig) -> Result<Self, SyncError> {
        let api = HttpMessagingApi::new(config.api_base_url.clone(), config.request_timeout())?;
        Ok(Self::with_parts(
            config,
            Arc::new(api),
            Arc::new(WebSocketConnector),
        ))
    }

    pub fn with_parts(
        config: &GatewayConfig,
        api: Arc<dyn MessagingApi>,
        connector: Arc<dyn PushConnector>,
    ) -> Self {
        let cache = SharedCache::default();
        let events = EventBus::new(config.event_buffer);
        let router = LiveEventRouter::new(cache.clone(), events.clone());
        let channel = PushChannel::new(
            connector,
            config.push_url.clone(),
            config.reconnect_policy(),
            router,
            events.clone(),
        );
        let history = HistoryLoader::new(
            api.clone(),
            cache.clone(),
            events.clone(),
            config.page_size(),
            config.pagination_threshold_px,
        );
        let directory =
            DirectoryLoader::new(api.clone(), cache.clone(), events.clone(), config.dialog_limit);
        let dispatcher =
            MutationDispatcher::new(api.clone(), cache.clone(), events.clone(), channel.sender());

        Self {
            api,
            cache,
            events,
            channel,
            history,
            directory,
            dispatcher,
            session: RwLock::new(None),
        }
    }

    /// Adopt an authenticated session and open the push channel for it.
    pub async fn start(&self, session: Session) -> Result<(), SyncError> {
        if !session.authenticated {
            return Err(SyncError::not_authenticated());
        }
        *self.session.write() = Some(session.clone());
        info!("sync engine started");
        self.channel.connect(&session).await
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn watch_channel_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.watch_state()
    }

    pub async fn load_dialogs(&self) -> Result<usize, SyncError> {
        let session = self.require_session()?;
        self.directory.load_dialogs(&session).await
    }

    /// Make `conversation_id` active and load its newest page.
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<usize, SyncError> {
        let session = self.require_session()?;
        self.set_active_conversation(Some(conversation_id));
        self.history.load_initial(&session, conversation_id).await
    }

    pub async fn load_older(
        &self,
        conversation_id: ConversationId,
        before: MessageId,
    ) -> Result<PageOutcome, SyncError> {
        let session = self.require_session()?;
        self.history
            .load_older(&session, conversation_id, before)
            .await
    }

    /// Viewport moved; `scroll_offset_px` is the distance to the oldest loaded message.
    pub async fn on_scroll(
        &self,
        conversation_id: ConversationId,
        scroll_offset_px: f32,
    ) -> Result<PageOutcome, SyncError> {
        let session = self.require_session()?;
        self.history
            .maybe_load_older(&session, conversation_id, scroll_offset_px)
            .await
    }

    pub async fn send(
        &self,
        conversation_id: ConversationId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, SyncError> {
        let session = self.require_session()?;
        self.dispatcher
            .send(&session, conversation_id, text, reply_to)
            .await
    }

    pub async fn edit(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<Message, SyncError> {
        let session = self.require_session()?;
        self.dispatcher
            .edit(&session, conversation_id, message_id, text)
            .await
    }

    pub async fn delete(
        &self,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<usize, SyncError> {
        let session = self.require_session()?;
        self.dispatcher
            .delete(&session, conversation_id, message_ids)
            .await
    }

    /// Send composer text, honoring the attached reply or edit target.
    pub async fn submit(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<Message, SyncError> {
        match self
            .cache
            .read(|cache| cache.compose_context(conversation_id))
        {
            Some(ComposeContext::Edit(message_id)) => {
                self.edit(conversation_id, message_id, text).await
            }
            Some(ComposeContext::Reply(reply_to)) => {
                self.send(conversation_id, text, Some(reply_to)).await
            }
            None => self.send(conversation_id, text, None).await,
        }
    }

    pub async fn upload(&self, upload: UploadRequest) -> Result<Message, SyncError> {
        let session = self.require_session()?;
        self.dispatcher.upload(&session, upload).await
    }

    pub fn mark_read(&self, conversation_id: ConversationId) -> bool {
        self.dispatcher.mark_read(conversation_id)
    }

    pub fn start_typing(&self, conversation_id: ConversationId) -> bool {
        self.dispatcher.start_typing(conversation_id)
    }

    pub async fn load_avatars(&self, entity_ids: &[EntityId]) -> Result<usize, SyncError> {
        let session = self.require_session()?;
        self.directory.load_avatars(&session, entity_ids).await
    }

    pub async fn load_avatar(&self, entity_id: EntityId) -> Result<bool, SyncError> {
        let session = self.require_session()?;
        self.directory.load_avatar(&session, entity_id).await
    }

    pub fn set_active_conversation(&self, conversation_id: Option<ConversationId>) {
        self.cache
            .write(|cache| cache.set_active_conversation(conversation_id));
    }

    pub fn set_reply_target(&self, conversation_id: ConversationId, message_id: MessageId) {
        self.cache.write(|cache| {
            cache.set_compose_context(conversation_id, ComposeContext::Reply(message_id))
        });
    }

    pub fn set_edit_target(&self, conversation_id: ConversationId, message_id: MessageId) {
        self.cache.write(|cache| {
            cache.set_compose_context(conversation_id, ComposeContext::Edit(message_id))
        });
    }

    pub fn cancel_compose(&self, conversation_id: ConversationId) {
        self.cache
            .write(|cache| cache.clear_compose_context(conversation_id));
    }

    /// Drop the session without contacting the gateway, e.g. after it was rejected.
    ///
    /// The push channel is closed so no reconnect targets the dead session.
    pub async fn invalidate_session(&self) {
        self.session.write().take();
        self.channel.close().await;
        warn!("session invalidated; push channel closed");
    }

    /// Sign out: best-effort remote logout, close the channel, and clear all cached state.
    pub async fn logout(&self) {
        let session = self.session.write().take();
        if let Some(session) = session
            && let Err(err) = self.api.logout(&session).await
        {
            warn!(error = %err, "remote logout failed; continuing local teardown");
        }

        self.channel.close().await;
        self.cache.write(|cache| cache.reset());
        self.history.reset();
        self.events.emit(SyncEvent::DialogsChanged);
        info!("logged out");
    }

    fn require_session(&self) -> Result<Session, SyncError> {
        self.session
            .read()
            .clone()
            .filter(|session| session.authenticated)
            .ok_or_else(SyncError::not_authenticated)
    }
}
