//! Explicit ownership of the lazily opened local store.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::LocalStore;
use crate::Result;

/// Where the local store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    InMemory,
    File(PathBuf),
}

/// Lifecycle of the store handle.
///
/// `Uninitialized` means no handle has been opened in this process yet. For a
/// file location the database may still exist on disk from an earlier run.
enum StoreSlot {
    Uninitialized,
    Ready(LocalStore),
}

/// Owner of the local store handle shared by the router and the orchestrator.
///
/// Readers use [`LocalContext::existing_store`] so that serving a request never
/// creates an empty store; only the sync path calls [`LocalContext::store`].
#[derive(Clone)]
pub struct LocalContext {
    location: StoreLocation,
    slot: Arc<Mutex<StoreSlot>>,
}

impl LocalContext {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            slot: Arc::new(Mutex::new(StoreSlot::Uninitialized)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::InMemory)
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    pub const fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Open the store, creating it on first use.
    pub async fn store(&self) -> Result<LocalStore> {
        let mut slot = self.slot.lock().await;
        if let StoreSlot::Ready(store) = &*slot {
            return Ok(store.clone());
        }

        let store = self.open().await?;
        *slot = StoreSlot::Ready(store.clone());
        Ok(store)
    }

    /// The store if it has ever been created, without creating it.
    pub async fn existing_store(&self) -> Result<Option<LocalStore>> {
        let mut slot = self.slot.lock().await;
        if let StoreSlot::Ready(store) = &*slot {
            return Ok(Some(store.clone()));
        }

        match &self.location {
            StoreLocation::File(path) if path.exists() => {
                let store = self.open().await?;
                *slot = StoreSlot::Ready(store.clone());
                Ok(Some(store))
            }
            _ => Ok(None),
        }
    }

    async fn open(&self) -> Result<LocalStore> {
        match &self.location {
            StoreLocation::InMemory => LocalStore::open_in_memory().await,
            StoreLocation::File(path) => {
                tracing::info!("Opening local store at {}", path.display());
                LocalStore::open_path(path).await
            }
        }
    }
}
