//! Backend collaborator.
//!
//! The backend owns the authoritative copy of every entity. Entities reach
//! it through three calls; retries and timeouts are the backend's business.

use crate::document::Document;
use crate::error::BackendResult;
use async_trait::async_trait;
use pulse_types::EntityId;

/// Fetches and persists entity documents.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetches the current document for `id`. With `use_cache == false` the
    /// backend must bypass any cache of its own.
    async fn get_individual(&self, id: &EntityId, use_cache: bool) -> BackendResult<Document>;

    /// Stores `document`, replacing the previous version.
    async fn put_individual(&self, document: &Document) -> BackendResult<()>;

    /// Deletes the entity.
    async fn remove_individual(&self, id: &EntityId) -> BackendResult<()>;
}

/// An in-memory backend for testing.
pub mod mock {
    use super::*;
    use crate::error::BackendError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;

    /// A recorded backend call.
    #[derive(Debug, Clone, PartialEq)]
    pub enum BackendCall {
        Get { id: EntityId, use_cache: bool },
        Put(Document),
        Remove(EntityId),
    }

    struct Inner {
        documents: Mutex<HashMap<EntityId, Document>>,
        calls: Mutex<Vec<BackendCall>>,
        failures: Mutex<VecDeque<BackendError>>,
        panic_next: AtomicBool,
        held: watch::Sender<bool>,
    }

    /// Backend over a map of documents, with call recording, failure
    /// injection and a gate that keeps calls in flight.
    #[derive(Clone)]
    pub struct MockBackend {
        inner: Arc<Inner>,
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Debug for MockBackend {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockBackend")
                .field("documents", &self.inner.documents.lock().unwrap().len())
                .field("calls", &self.inner.calls.lock().unwrap().len())
                .finish()
        }
    }

    impl MockBackend {
        pub fn new() -> Self {
            let (held, _) = watch::channel(false);
            Self {
                inner: Arc::new(Inner {
                    documents: Mutex::new(HashMap::new()),
                    calls: Mutex::new(Vec::new()),
                    failures: Mutex::new(VecDeque::new()),
                    panic_next: AtomicBool::new(false),
                    held,
                }),
            }
        }

        /// Stores a document as if it had been saved earlier.
        pub fn insert(&self, document: Document) {
            self.inner
                .documents
                .lock()
                .unwrap()
                .insert(document.id.clone(), document);
        }

        /// The stored document for `id`.
        pub fn document(&self, id: &EntityId) -> Option<Document> {
            self.inner.documents.lock().unwrap().get(id).cloned()
        }

        /// Every call so far, in arrival order.
        pub fn calls(&self) -> Vec<BackendCall> {
            self.inner.calls.lock().unwrap().clone()
        }

        pub fn get_calls(&self) -> usize {
            self.count(|c| matches!(c, BackendCall::Get { .. }))
        }

        pub fn put_calls(&self) -> usize {
            self.count(|c| matches!(c, BackendCall::Put(_)))
        }

        pub fn remove_calls(&self) -> usize {
            self.count(|c| matches!(c, BackendCall::Remove(_)))
        }

        fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
            self.inner.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
        }

        /// Makes the next call fail with `error`. Calls stack.
        pub fn fail_next(&self, error: BackendError) {
            self.inner.failures.lock().unwrap().push_back(error);
        }

        /// Makes the next call panic.
        pub fn panic_next(&self) {
            self.inner.panic_next.store(true, Ordering::SeqCst);
        }

        /// Holds every call (current and future) until [`release`](Self::release).
        pub fn hold(&self) {
            self.inner.held.send_replace(true);
        }

        /// Lets held calls complete.
        pub fn release(&self) {
            self.inner.held.send_replace(false);
        }

        async fn enter(&self, call: BackendCall) -> BackendResult<()> {
            self.inner.calls.lock().unwrap().push(call);

            let mut held = self.inner.held.subscribe();
            let _ = held.wait_for(|held| !*held).await;

            if self.inner.panic_next.swap(false, Ordering::SeqCst) {
                panic!("injected backend panic");
            }
            let failure = self.inner.failures.lock().unwrap().pop_front();
            match failure {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn get_individual(&self, id: &EntityId, use_cache: bool) -> BackendResult<Document> {
            self.enter(BackendCall::Get {
                id: id.clone(),
                use_cache,
            })
            .await?;
            self.document(id)
                .ok_or_else(|| BackendError::NotFound(id.to_string()))
        }

        async fn put_individual(&self, document: &Document) -> BackendResult<()> {
            self.enter(BackendCall::Put(document.clone())).await?;
            self.insert(document.clone());
            Ok(())
        }

        async fn remove_individual(&self, id: &EntityId) -> BackendResult<()> {
            self.enter(BackendCall::Remove(id.clone())).await?;
            let removed = self.inner.documents.lock().unwrap().remove(id);
            removed
                .map(|_| ())
                .ok_or_else(|| BackendError::NotFound(id.to_string()))
        }
    }
}
