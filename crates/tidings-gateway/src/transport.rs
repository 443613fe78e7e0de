//! Push channel: one long-lived websocket per session with fixed-delay reconnect.

use std::{pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt, future, stream::BoxStream};
use parking_lot::Mutex;
use tidings_core::{
    ChannelSignal, ChannelState, ChannelStateMachine, ErrorCategory, EventBus, LiveEventRouter,
    OutboundEvent, ReconnectPolicy, Session, SyncError, encode_outbound,
};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Inbound text frames of one connection. The stream ends when the peer closes.
pub type FrameStream = BoxStream<'static, Result<String, SyncError>>;
/// Outbound text frames of one connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// One established push connection.
pub struct PushConnection {
    pub frames: FrameStream,
    pub sink: FrameSink,
}

/// Opens push connections. Implemented over websockets in production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<PushConnection, SyncError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<PushConnection, SyncError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(map_ws_error)?;
        let (sink, stream) = socket.split();

        let frames = stream
            .filter_map(|message| {
                future::ready(match message {
                    Ok(WsMessage::Text(text)) => Some(Ok(text)),
                    Ok(WsMessage::Close(frame)) => {
                        debug!(?frame, "push peer sent close frame");
                        None
                    }
                    Ok(_) => None,
                    Err(err) => Some(Err(map_ws_error(err))),
                })
            })
            .boxed();
        let sink = sink
            .sink_map_err(map_ws_error)
            .with(|text: String| future::ready(Ok::<_, SyncError>(WsMessage::Text(text))));

        Ok(PushConnection {
            frames,
            sink: Box::pin(sink),
        })
    }
}

/// Session-scoped push endpoint.
pub fn session_endpoint(push_url: &Url, session: &Session) -> Url {
    let mut url = push_url.clone();
    url.query_pairs_mut()
        .append_pair("session_id", &session.handle);
    url
}

fn map_ws_error(err: WsError) -> SyncError {
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            SyncError::from_http_status(
                status,
                "push_handshake_rejected",
                format!("push handshake rejected with status {status}"),
            )
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => SyncError::new(
            ErrorCategory::Network,
            "push_connection_closed",
            err.to_string(),
        ),
        other => SyncError::new(
            ErrorCategory::Network,
            "push_transport_error",
            other.to_string(),
        ),
    }
}

/// Owns the channel state machine and publishes every transition.
struct Lifecycle {
    machine: Mutex<ChannelStateMachine>,
    state_tx: watch::Sender<ChannelState>,
    events: EventBus,
}

impl Lifecycle {
    fn apply(&self, signal: ChannelSignal) -> Result<(), SyncError> {
        let mut machine = self.machine.lock();
        let from = machine.state();
        let events = machine.apply(signal)?;
        if events.is_empty() {
            return Ok(());
        }

        let state = machine.state();
        info!(?from, to = ?state, ?signal, "push channel state changed");
        self.state_tx.send_replace(state);
        for event in events {
            self.events.emit(event);
        }
        Ok(())
    }
}

/// Cheap handle for fire-and-forget channel sends.
#[derive(Clone)]
pub struct PushSender {
    state: watch::Receiver<ChannelState>,
    outbound: mpsc::UnboundedSender<String>,
}

impl PushSender {
    /// Queue `event` if the channel is open. Returns whether it was queued; frames are
    /// never buffered across a disconnect.
    pub fn send(&self, event: &OutboundEvent) -> bool {
        let state = *self.state.borrow();
        if state != ChannelState::Open {
            debug!(?state, ?event, "push channel not open; dropping outbound event");
            return false;
        }
        match encode_outbound(event) {
            Ok(frame) => self.outbound.send(frame).is_ok(),
            Err(err) => {
                warn!(error = %err, "failed to encode outbound event");
                false
            }
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }
}

struct RunningChannel {
    session_handle: String,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Push channel for one session at a time.
///
/// `connect` spawns a task that keeps the connection up until `close`: on any drop it
/// waits the fixed reconnect delay and tries again, indefinitely. While open, a ping is
/// sent every heartbeat interval.
pub struct PushChannel {
    connector: Arc<dyn PushConnector>,
    push_url: Url,
    policy: ReconnectPolicy,
    router: LiveEventRouter,
    lifecycle: Arc<Lifecycle>,
    state_rx: watch::Receiver<ChannelState>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
    running: AsyncMutex<Option<RunningChannel>>,
}

impl PushChannel {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        push_url: Url,
        policy: ReconnectPolicy,
        router: LiveEventRouter,
        events: EventBus,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            push_url,
            policy,
            router,
            lifecycle: Arc::new(Lifecycle {
                machine: Mutex::new(ChannelStateMachine::default()),
                state_tx,
                events,
            }),
            state_rx,
            outbound_tx,
            outbound_rx: Arc::new(AsyncMutex::new(outbound_rx)),
            running: AsyncMutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Watch channel state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    pub fn sender(&self) -> PushSender {
        PushSender {
            state: self.state_rx.clone(),
            outbound: self.outbound_tx.clone(),
        }
    }

    /// Start the connection loop for `session`.
    ///
    /// A no-op while already running for the same session. A running loop bound to a
    /// different session is torn down first, so at most one connection exists and it
    /// always targets the current session.
    pub async fn connect(&self, session: &Session) -> Result<(), SyncError> {
        if !session.authenticated {
            return Err(SyncError::not_authenticated());
        }

        let mut guard = self.running.lock().await;
        match guard.as_ref() {
            Some(running) if running.session_handle == session.handle => {
                debug!("push channel already running for this session; connect ignored");
                return Ok(());
            }
            Some(_) => {
                info!("session changed; rebinding push channel");
                self.shutdown(guard.take()).await;
            }
            None => {}
        }

        self.lifecycle.apply(ChannelSignal::Connect)?;

        let stop = CancellationToken::new();
        let connection_loop = ConnectionLoop {
            connector: self.connector.clone(),
            url: session_endpoint(&self.push_url, session),
            policy: self.policy,
            router: self.router.clone(),
            lifecycle: self.lifecycle.clone(),
            outbound_rx: self.outbound_rx.clone(),
        };
        let task = tokio::spawn(connection_loop.run(stop.child_token()));

        *guard = Some(RunningChannel {
            session_handle: session.handle.clone(),
            stop,
            task,
        });
        Ok(())
    }

    /// Tear the channel down and cancel any pending reconnect.
    pub async fn close(&self) {
        let running = self.running.lock().await.take();
        self.shutdown(running).await;
    }

    async fn shutdown(&self, running: Option<RunningChannel>) {
        if let Some(running) = running {
            running.stop.cancel();
            if let Err(err) = running.task.await {
                warn!(error = %err, "push channel task ended abnormally");
            }
        }

        if let Err(err) = self.lifecycle.apply(ChannelSignal::Close) {
            warn!(error = %err, "push channel close rejected");
        }

        // Frames queued for the closed session must not leak into the next one.
        if let Ok(mut outbound) = self.outbound_rx.try_lock() {
            while outbound.try_recv().is_ok() {}
        }
    }
}

enum PumpExit {
    Cancelled,
    Lost(Option<SyncError>),
}

struct ConnectionLoop {
    connector: Arc<dyn PushConnector>,
    url: Url,
    policy: ReconnectPolicy,
    router: LiveEventRouter,
    lifecycle: Arc<Lifecycle>,
    outbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
}

impl ConnectionLoop {
    async fn run(self, stop: CancellationToken) {
        let mut outbound = self.outbound_rx.clone().lock_owned().await;
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = stop.cancelled() => break,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(connection) => {
                    attempt = 0;
                    if !self.transition(ChannelSignal::Connected) {
                        break;
                    }
                    match self.pump(connection, &mut outbound, &stop).await {
                        PumpExit::Cancelled => break,
                        PumpExit::Lost(Some(err)) => {
                            warn!(error = %err, "push connection lost");
                        }
                        PumpExit::Lost(None) => info!("push connection closed by peer"),
                    }
                }
                Err(err) => {
                    warn!(error = %err, attempt, "push connect attempt failed");
                }
            }

            if !self.transition(ChannelSignal::ConnectionLost) {
                break;
            }
            while outbound.try_recv().is_ok() {
                trace!("discarding frame queued before disconnect");
            }

            let delay = self.policy.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, attempt, "push reconnect scheduled");

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = time::sleep(delay) => {}
            }

            if !self.transition(ChannelSignal::RetryElapsed) {
                break;
            }
        }

        debug!("push connection loop stopped");
    }

    async fn pump(
        &self,
        connection: PushConnection,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        stop: &CancellationToken,
    ) -> PumpExit {
        let PushConnection { mut frames, mut sink } = connection;
        let period = self.policy.heartbeat_interval();
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    if let Err(err) = sink.close().await {
                        debug!(error = %err, "push sink close failed");
                    }
                    return PumpExit::Cancelled;
                }
                frame = frames.next() => match frame {
                    Some(Ok(text)) => {
                        self.router.route_frame(&text);
                    }
                    Some(Err(err)) => return PumpExit::Lost(Some(err)),
                    None => return PumpExit::Lost(None),
                },
                Some(frame) = outbound.recv() => {
                    if let Err(err) = sink.send(frame).await {
                        return PumpExit::Lost(Some(err));
                    }
                }
                _ = heartbeat.tick() => {
                    let Ok(ping) = encode_outbound(&OutboundEvent::Ping {}) else {
                        continue;
                    };
                    trace!("sending push heartbeat");
                    if let Err(err) = sink.send(ping).await {
                        return PumpExit::Lost(Some(err));
                    }
                }
            }
        }
    }

    fn transition(&self, signal: ChannelSignal) -> bool {
        match self.lifecycle.apply(signal) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "push connection loop stopping");
                false
            }
        }
    }
}
