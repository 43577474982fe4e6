//! In-flight request cancellation table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::Id;
use tracing::debug;

use crate::protocol::Origin;

/// A request is identified by the connection it came from and its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancellationKey {
    pub origin: Origin,
    pub id: Id,
}

impl CancellationKey {
    pub fn new(origin: Origin, id: Id) -> Self {
        Self { origin, id }
    }
}

/// Maps in-flight requests to their cancellation token. Entries must be
/// removed when the request completes.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    handles: Arc<Mutex<HashMap<CancellationKey, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for `key` and returns it.
    pub fn register(&self, key: CancellationKey) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(key, token.clone());
        token
    }

    /// Cancels the request under `key`. Unknown or completed requests are
    /// ignored.
    pub fn cancel(&self, key: &CancellationKey) -> bool {
        match self.lock().get(key) {
            Some(token) => {
                debug!("Cancelling request {} from {:?}", key.id, key.origin);
                token.cancel();
                true
            }
            None => {
                debug!("No in-flight request {} from {:?}", key.id, key.origin);
                false
            }
        }
    }

    pub fn remove(&self, key: &CancellationKey) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CancellationKey, CancellationToken>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}
