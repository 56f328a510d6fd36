//! Transport layer abstraction.
//!
//! The push channel talks to the server through a [`Connector`], which opens
//! a duplex [`Link`] of text frames. The production connector is
//! [`crate::ws::WsConnector`]; tests use [`mock::MockConnector`].

use crate::error::SyncResult;
use async_trait::async_trait;

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one text frame.
    async fn send(&mut self, frame: String) -> SyncResult<()>;

    /// Closes the connection from our side.
    async fn close(&mut self) -> SyncResult<()>;
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receives the next text frame.
    /// Returns `None` once the remote end has closed the connection.
    ///
    /// Must be cancel-safe: the channel polls it inside `tokio::select!`.
    async fn next_frame(&mut self) -> Option<SyncResult<String>>;
}

/// An open duplex connection.
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens connections to a push endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `endpoint`.
    async fn connect(&self, endpoint: &str) -> SyncResult<Link>;
}

/// A mock transport for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// Server side of one mock connection.
    #[derive(Debug, Clone)]
    pub struct MockRemote {
        sent: Arc<Mutex<Vec<String>>>,
        inbound: Arc<Mutex<Option<mpsc::UnboundedSender<SyncResult<String>>>>>,
        closed_by_client: Arc<AtomicBool>,
    }

    impl MockRemote {
        /// Pushes a frame to the client.
        pub fn push(&self, frame: impl Into<String>) {
            if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
                let _ = tx.send(Ok(frame.into()));
            }
        }

        /// Delivers a transport error to the client; the stream then ends.
        pub fn fail(&self, message: impl Into<String>) {
            if let Some(tx) = self.inbound.lock().unwrap().take() {
                let _ = tx.send(Err(SyncError::Network(message.into())));
            }
        }

        /// Closes the connection from the server side.
        pub fn close(&self) {
            self.inbound.lock().unwrap().take();
        }

        /// Whether the server side is still accepting frames.
        pub fn is_open(&self) -> bool {
            self.inbound.lock().unwrap().is_some()
        }

        /// Whether the client closed the connection.
        pub fn closed_by_client(&self) -> bool {
            self.closed_by_client.load(Ordering::SeqCst)
        }

        /// Frames received from the client, in order.
        pub fn sent_frames(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        /// Fragments received from the client, across all frames.
        pub fn sent_fragments(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .flat_map(|frame| frame.split(',').map(str::to_string).collect::<Vec<_>>())
                .collect()
        }
    }

    struct MockSink {
        remote: MockRemote,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send(&mut self, frame: String) -> SyncResult<()> {
            if !self.remote.is_open() {
                return Err(SyncError::ChannelClosed);
            }
            self.remote.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn close(&mut self) -> SyncResult<()> {
            self.remote.closed_by_client.store(true, Ordering::SeqCst);
            self.remote.close();
            Ok(())
        }
    }

    struct MockStream {
        rx: mpsc::UnboundedReceiver<SyncResult<String>>,
    }

    #[async_trait]
    impl FrameStream for MockStream {
        async fn next_frame(&mut self) -> Option<SyncResult<String>> {
            self.rx.recv().await
        }
    }

    #[derive(Debug, Default)]
    struct MockState {
        attempts: Vec<(Instant, String)>,
        refusals: VecDeque<String>,
        remotes: Vec<MockRemote>,
    }

    /// A connector that hands out in-memory connections.
    #[derive(Debug, Clone, Default)]
    pub struct MockConnector {
        state: Arc<Mutex<MockState>>,
    }

    impl MockConnector {
        /// Creates a connector that accepts every attempt.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next connect attempt fail with `reason`.
        /// Calls stack: each one refuses one further attempt.
        pub fn refuse_next(&self, reason: impl Into<String>) {
            self.state.lock().unwrap().refusals.push_back(reason.into());
        }

        /// Number of connect attempts so far, successful or not.
        pub fn attempts(&self) -> usize {
            self.state.lock().unwrap().attempts.len()
        }

        /// When each connect attempt happened.
        pub fn attempt_times(&self) -> Vec<Instant> {
            self.state
                .lock()
                .unwrap()
                .attempts
                .iter()
                .map(|(at, _)| *at)
                .collect()
        }

        /// Endpoint of each connect attempt.
        pub fn endpoints(&self) -> Vec<String> {
            self.state
                .lock()
                .unwrap()
                .attempts
                .iter()
                .map(|(_, endpoint)| endpoint.clone())
                .collect()
        }

        /// Number of connections that were accepted.
        pub fn connections(&self) -> usize {
            self.state.lock().unwrap().remotes.len()
        }

        /// Server side of the `index`-th accepted connection.
        pub fn remote(&self, index: usize) -> Option<MockRemote> {
            self.state.lock().unwrap().remotes.get(index).cloned()
        }

        /// Server side of the most recent accepted connection.
        pub fn last_remote(&self) -> Option<MockRemote> {
            self.state.lock().unwrap().remotes.last().cloned()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, endpoint: &str) -> SyncResult<Link> {
            let mut state = self.state.lock().unwrap();
            state.attempts.push((Instant::now(), endpoint.to_string()));
            if let Some(reason) = state.refusals.pop_front() {
                return Err(SyncError::ConnectionRefused(reason));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let remote = MockRemote {
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound: Arc::new(Mutex::new(Some(tx))),
                closed_by_client: Arc::new(AtomicBool::new(false)),
            };
            state.remotes.push(remote.clone());

            Ok(Link {
                sink: Box::new(MockSink { remote }),
                stream: Box::new(MockStream { rx }),
            })
        }
    }
}
