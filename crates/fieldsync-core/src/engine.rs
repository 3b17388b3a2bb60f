//! Wiring of the engine components around one store, cache and client.

use crate::cache::{CacheStore, CredentialCache};
use crate::config::EngineConfig;
use crate::router::Router;
use crate::scheduler::{RetryPolicy, TaskScheduler};
use crate::store::LocalContext;
use crate::sync::{SyncOrchestrator, SyncSettings};
use crate::telemetry::TelemetryForwarder;
use crate::transport::HttpClient;
use crate::uploads::UploadQueue;
use crate::worker::Worker;
use crate::Result;

/// Shared handles every component is built from.
#[derive(Clone)]
pub struct Engine<C> {
    pub context: LocalContext,
    pub cache: CacheStore,
    pub credentials: CredentialCache,
    pub scheduler: TaskScheduler,
    pub client: C,
    settings: SyncSettings,
}

impl<C: HttpClient + Clone> Engine<C> {
    /// Open the on-disk cache; the store itself is opened lazily.
    pub async fn open(config: &EngineConfig, client: C) -> Result<Self> {
        let cache = CacheStore::open_path(config.cache_path()).await?;
        tracing::debug!("Engine data directory: {}", config.data_dir.display());
        Ok(Self::assemble(
            LocalContext::at_path(config.store_path()),
            cache,
            client,
            TaskScheduler::new(config.retry.clone()),
            config.sync_settings(),
        ))
    }

    /// Fully in-memory engine (primarily for tests).
    pub async fn in_memory(client: C, policy: RetryPolicy) -> Result<Self> {
        let cache = CacheStore::open_in_memory().await?;
        Ok(Self::assemble(
            LocalContext::in_memory(),
            cache,
            client,
            TaskScheduler::new(policy),
            SyncSettings::default(),
        ))
    }

    fn assemble(
        context: LocalContext,
        cache: CacheStore,
        client: C,
        scheduler: TaskScheduler,
        settings: SyncSettings,
    ) -> Self {
        Self {
            context,
            credentials: CredentialCache::new(cache.clone()),
            cache,
            scheduler,
            client,
            settings,
        }
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn orchestrator(&self) -> SyncOrchestrator<C> {
        SyncOrchestrator::new(
            self.context.clone(),
            self.credentials.clone(),
            self.client.clone(),
            self.scheduler.clone(),
            self.settings.clone(),
        )
    }

    pub fn uploads(&self) -> UploadQueue<C> {
        UploadQueue::new(self.cache.clone(), self.client.clone())
    }

    pub fn telemetry(&self) -> TelemetryForwarder<C> {
        TelemetryForwarder::new(
            self.cache.clone(),
            self.client.clone(),
            self.scheduler.clone(),
        )
    }

    pub fn router(&self) -> Router<C> {
        Router::new(
            self.context.clone(),
            self.settings.scope.clone(),
            self.cache.clone(),
            self.credentials.clone(),
            self.uploads(),
            self.telemetry(),
        )
    }

    pub fn worker(&self) -> Worker<C> {
        Worker::new(self)
    }
}
