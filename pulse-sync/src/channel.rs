//! Reconnecting, batching push channel.
//!
//! One channel per store carries all subscription traffic. Outbound
//! fragments are queued in an [`Outbox`] and flushed as a single frame
//! `flush_interval` after the first fragment of a batch arrives, but only
//! while the connection is open. Fragments queued
//! while disconnected wait for the next session; they are never dropped.
//!
//! Connection lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Open → (Closing | error) → wait reconnect_delay → Connecting
//! ```
//!
//! The first connection attempt is deferred until the first fragment is
//! queued. Transport faults are logged and followed by a reconnect; they are
//! never reported to the outbox's producers.

use crate::error::{SyncError, SyncResult};
use crate::protocol::encode_frame;
use crate::transport::{Connector, FrameSink, Link};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default push endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8088/ccus";

/// Configuration for the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// `ws://` or `wss://` endpoint.
    pub endpoint: String,
    /// Wait between a close/error and the next connect attempt (ms).
    pub reconnect_delay_ms: u64,
    /// Batching window between the first queued fragment and the flush (ms).
    pub flush_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay_ms: 30_000,
            flush_interval_ms: 500,
        }
    }
}

impl ChannelConfig {
    /// Creates a config for `endpoint` with default timings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Parses a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the endpoint scheme and timings.
    pub fn validate(&self) -> SyncResult<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(SyncError::Protocol(format!(
                "push endpoint must be ws:// or wss://, got {:?}",
                self.endpoint
            )));
        }
        if self.flush_interval_ms == 0 {
            return Err(SyncError::Protocol("flush interval must be positive".into()));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Receives inbound frames.
pub trait FrameHandler: Send + Sync {
    /// Called on the channel task for every inbound text frame.
    /// Must not block.
    fn on_frame(&self, frame: &str);
}

/// Queue of encoded outbound fragments awaiting the next flush.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Mutex<VecDeque<String>>,
    wake: Notify,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a fragment and wakes the channel.
    pub fn push(&self, fragment: impl Into<String>) {
        self.queue.lock().unwrap().push_back(fragment.into());
        self.wake.notify_one();
    }

    /// Number of queued fragments.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    /// Copies the queued fragments, oldest first.
    pub fn pending(&self) -> Vec<String> {
        self.queue.lock().unwrap().iter().cloned().collect()
    }

    /// Takes every queued fragment.
    pub fn drain(&self) -> Vec<String> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    /// Puts fragments that could not be sent back in front of newer ones.
    fn requeue_front(&self, fragments: Vec<String>) {
        let mut queue = self.queue.lock().unwrap();
        for fragment in fragments.into_iter().rev() {
            queue.push_front(fragment);
        }
    }

    async fn wait(&self) {
        self.wake.notified().await;
    }
}

/// Handle to the background push channel task.
///
/// Dropping the handle stops the task at its next suspension point.
pub struct PushChannel {
    outbox: Arc<Outbox>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushChannel")
            .field("state", &*self.state.borrow())
            .field("pending", &self.outbox.len())
            .finish()
    }
}

impl PushChannel {
    /// Spawns the channel task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        outbox: Arc<Outbox>,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = Driver {
            config,
            connector,
            outbox: outbox.clone(),
            handler,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(driver.run());

        Self {
            outbox,
            state: state_rx,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The queue this channel drains.
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Number of fragments waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Closes the connection and stops reconnecting. Queued fragments stay
    /// in the outbox.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Push channel task ended abnormally: {}", e);
            }
        }
    }
}

/// Why a session ended.
enum SessionEnd {
    Shutdown,
    Closed,
    Failed(SyncError),
}

struct Driver {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    outbox: Arc<Outbox>,
    handler: Arc<dyn FrameHandler>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once shutdown is requested or the channel handle is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl Driver {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn run(self) {
        let mut stop = self.shutdown.clone();

        if self.outbox.is_empty() {
            tokio::select! {
                _ = self.outbox.wait() => {}
                _ = stopped(&mut stop) => return,
            }
        }

        loop {
            self.set_state(ConnectionState::Connecting);
            debug!("Connecting push channel to {}", self.config.endpoint);

            let connected = tokio::select! {
                result = self.connector.connect(&self.config.endpoint) => result,
                _ = stopped(&mut stop) => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            };

            match connected {
                Ok(link) => {
                    self.set_state(ConnectionState::Open);
                    info!("Push channel open: {}", self.config.endpoint);
                    match self.session(link).await {
                        SessionEnd::Shutdown => {
                            self.set_state(ConnectionState::Disconnected);
                            info!("Push channel shut down");
                            return;
                        }
                        SessionEnd::Closed => warn!("Push channel closed by server"),
                        SessionEnd::Failed(e) => warn!("Push channel error: {}", e),
                    }
                }
                Err(e) => warn!("Push channel connect failed: {}", e),
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.config.reconnect_delay();
            info!("Reconnecting push channel in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut stop) => return,
            }
        }
    }

    async fn session(&self, link: Link) -> SessionEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;
        let mut stop = self.shutdown.clone();
        let interval = self.config.flush_interval();
        let mut flush_at = (!self.outbox.is_empty()).then(|| Instant::now() + interval);

        loop {
            let deadline = flush_at.unwrap_or_else(|| Instant::now() + interval);
            tokio::select! {
                frame = stream.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        debug!("Push frame received ({} bytes)", frame.len());
                        self.handler.on_frame(&frame);
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::Closed,
                },
                _ = self.outbox.wait(), if flush_at.is_none() => {
                    flush_at = Some(Instant::now() + interval);
                }
                _ = tokio::time::sleep_until(deadline), if flush_at.is_some() => {
                    flush_at = None;
                    if let Err(e) = self.flush(sink.as_mut()).await {
                        return SessionEnd::Failed(e);
                    }
                }
                _ = stopped(&mut stop) => {
                    self.set_state(ConnectionState::Closing);
                    if let Err(e) = sink.close().await {
                        debug!("Error closing push channel: {}", e);
                    }
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    async fn flush(&self, sink: &mut dyn FrameSink) -> SyncResult<()> {
        let fragments = self.outbox.drain();
        if fragments.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} push fragments", fragments.len());
        let frame = encode_frame(&fragments);
        if let Err(e) = sink.send(frame).await {
            self.outbox.requeue_front(fragments);
            return Err(e);
        }
        Ok(())
    }
}
