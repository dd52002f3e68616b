/// Connection manager: at most one push connection, bound to the session credential
use super::protocol::{ClientFrame, InboundEvent, ServerFrame};
use super::transport::{PushLink, PushTransport};
use crate::config::ReconnectPolicy;
use crate::error::SyncError;
use crate::session::SessionCredential;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Connection state of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No live transport
    Disconnected,
    /// Connecting or waiting for the handshake ack
    Connecting,
    /// Authenticated and ready
    Connected,
}

/// Knobs the connection task needs
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub keepalive_interval: Duration,
    pub outbound_buffer: usize,
    pub reconnect: ReconnectPolicy,
}

impl From<&crate::config::Config> for ConnectionOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval,
            outbound_buffer: config.outbound_buffer,
            reconnect: config.reconnect.clone(),
        }
    }
}

/// Connection generations, shared with the dispatcher.
///
/// Every bind starts a new generation. Events from generations below the
/// fence belong to a previous session and are discarded.
#[derive(Debug, Default)]
pub struct Generations {
    current: AtomicU64,
    fence: AtomicU64,
}

impl Generations {
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Whether events from `generation` may still reach the caches
    pub fn accepts(&self, generation: u64) -> bool {
        generation >= self.fence.load(Ordering::SeqCst)
    }

    pub(crate) fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn raise_fence(&self) {
        self.fence.store(self.current() + 1, Ordering::SeqCst);
    }
}

/// A classified push event and the connection generation that received it
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub generation: u64,
    pub event: InboundEvent,
}

/// The bound credential and the task serving it
#[derive(Default)]
struct Binding {
    credential: Option<SessionCredential>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    options: ConnectionOptions,
    inbound: mpsc::Sender<PushEvent>,
    state: watch::Sender<ConnectionState>,
    /// Bumped on every bind; writes from an older task are ignored
    generations: Arc<Generations>,
    binding: Mutex<Binding>,
    outbound: RwLock<Option<(u64, mpsc::Sender<ClientFrame>)>>,
}

/// Owns the single push connection.
///
/// Cloning shares the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// `inbound` receives every classified push event in arrival order
    pub fn new(
        transport: Arc<dyn PushTransport>,
        options: ConnectionOptions,
        inbound: mpsc::Sender<PushEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                options,
                inbound,
                state,
                generations: Arc::new(Generations::default()),
                binding: Mutex::new(Binding::default()),
                outbound: RwLock::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn generations(&self) -> Arc<Generations> {
        self.inner.generations.clone()
    }

    /// Discard every event received by connections bound so far, including
    /// events already queued for dispatch
    pub fn fence(&self) {
        self.inner.generations.raise_fence();
        debug!(
            "Push events before generation {} fenced off",
            self.inner.generations.current() + 1
        );
    }

    /// Bind the connection to `credential`.
    ///
    /// Any connection for a different credential is torn down and fully
    /// released before a new attempt starts. `None` leaves the channel
    /// `Disconnected`. Binding the credential that is already being served
    /// does nothing.
    pub async fn bind(&self, credential: Option<SessionCredential>) {
        let mut binding = self.inner.binding.lock().await;

        let serving = binding
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if binding.credential == credential && (credential.is_none() || serving) {
            debug!("Push channel already bound to {:?}", credential);
            return;
        }

        let generation = self.inner.generations.advance();

        if let Some(task) = binding.task.take() {
            task.abort();
            // wait until the old link is dropped
            let _ = task.await;
            debug!("Previous push connection released");
        }
        self.inner.outbound.write().await.take();
        self.inner.state.send_replace(ConnectionState::Disconnected);
        binding.credential = credential.clone();

        match credential {
            Some(credential) => {
                info!("Binding push channel to {}", credential);
                self.inner.state.send_replace(ConnectionState::Connecting);
                let inner = self.inner.clone();
                binding.task = Some(tokio::spawn(async move {
                    inner.run(credential, generation).await;
                }));
            }
            None => info!("Push channel unbound"),
        }
    }

    /// Unbind and wait for the connection to be released
    pub async fn shutdown(&self) {
        self.bind(None).await;
    }

    pub async fn send_message(&self, conversation_id: &str, content: &str) {
        self.send(ClientFrame::SendMessage {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
        })
        .await;
    }

    pub async fn signal_typing_start(&self, conversation_id: &str) {
        self.send(ClientFrame::TypingStart {
            conversation_id: conversation_id.to_string(),
        })
        .await;
    }

    pub async fn signal_typing_stop(&self, conversation_id: &str) {
        self.send(ClientFrame::TypingStop {
            conversation_id: conversation_id.to_string(),
        })
        .await;
    }

    /// Hand a frame to the live connection. Dropped unless connected.
    async fn send(&self, frame: ClientFrame) {
        if !self.is_connected() {
            debug!("Push channel not connected, dropping {}", frame);
            return;
        }
        let outbound = self.inner.outbound.read().await;
        match outbound.as_ref() {
            Some((_, tx)) => {
                if let Err(e) = tx.try_send(frame) {
                    debug!("Outbound frame dropped: {}", e);
                }
            }
            None => debug!("Push channel has no writer, dropping {}", frame),
        }
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generations.current() == generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if self.is_current(generation) {
            self.state.send_replace(state);
        }
    }

    /// Connect, serve, and reconnect per policy until retries run out
    async fn run(self: Arc<Self>, credential: SessionCredential, generation: u64) {
        let mut attempt = 0u32;
        loop {
            self.set_state(generation, ConnectionState::Connecting);
            match self.transport.connect(&credential).await {
                Ok(link) => {
                    attempt = 0;
                    info!("Push channel connected");
                    self.serve(link, generation).await;
                }
                Err(SyncError::Handshake(reason)) => {
                    warn!("Push handshake rejected: {}", reason);
                    self.set_state(generation, ConnectionState::Disconnected);
                    return;
                }
                Err(e) => warn!("Push connection failed: {}", e),
            }

            self.release_writer(generation).await;
            self.set_state(generation, ConnectionState::Disconnected);

            attempt += 1;
            match self.options.reconnect.delay_for_attempt(attempt) {
                Some(delay) => {
                    info!(
                        "Reconnecting push channel in {:?} (attempt {}/{})",
                        delay, attempt, self.options.reconnect.max_retries
                    );
                    sleep(delay).await;
                }
                None => {
                    debug!("Push channel stays disconnected");
                    return;
                }
            }
        }
    }

    async fn release_writer(&self, generation: u64) {
        let mut outbound = self.outbound.write().await;
        if outbound.as_ref().is_some_and(|(g, _)| *g == generation) {
            outbound.take();
        }
    }

    /// Pump frames both ways until the link ends
    async fn serve(&self, mut link: Box<dyn PushLink>, generation: u64) {
        let (tx, mut rx) = mpsc::channel(self.options.outbound_buffer);
        {
            let mut outbound = self.outbound.write().await;
            if !self.is_current(generation) {
                return;
            }
            *outbound = Some((generation, tx));
        }
        self.set_state(generation, ConnectionState::Connected);

        let period = self.options.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = link.recv() => match received {
                    Ok(Some(frame)) => {
                        if !self.handle_frame(frame, generation).await {
                            return;
                        }
                    }
                    Ok(None) => {
                        info!("Push channel closed by server");
                        return;
                    }
                    Err(SyncError::Serialization(e)) => {
                        warn!("Skipping malformed push payload: {}", e);
                    }
                    Err(e) => {
                        warn!("Push channel error: {}", e);
                        return;
                    }
                },
                Some(frame) = rx.recv() => {
                    if let Err(e) = link.send(frame).await {
                        warn!("Push send failed: {}", e);
                        return;
                    }
                    keepalive.reset();
                }
                _ = keepalive.tick() => {
                    if let Err(e) = link.send(ClientFrame::Ping).await {
                        warn!("Keepalive failed: {}", e);
                        return;
                    }
                }
            }
        }
    }

    /// Returns false when the connection should end
    async fn handle_frame(&self, frame: ServerFrame, generation: u64) -> bool {
        match frame {
            ServerFrame::Pong => {
                debug!("pong");
                true
            }
            ServerFrame::Error { message } => {
                warn!("Push server error: {}", message);
                true
            }
            ServerFrame::Close { reason } => {
                info!("Push server closed the channel: {}", reason);
                false
            }
            ServerFrame::HandshakeAck { .. } | ServerFrame::HandshakeRejected { .. } => {
                debug!("Ignoring late {}", frame);
                true
            }
            frame => match frame.into_event() {
                Some(event) => {
                    if self.inbound.send(PushEvent { generation, event }).await.is_err() {
                        debug!("Dispatch loop gone, closing push channel");
                        return false;
                    }
                    true
                }
                None => true,
            },
        }
    }
}
