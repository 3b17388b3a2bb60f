//! Pull-based sync driver.

use http::StatusCode;

use crate::cache::CredentialCache;
use crate::db::LOCAL_STORE_VERSION;
use crate::models::{Credentials, SyncMetadata, SyncStatus, DEFAULT_SCOPE};
use crate::scheduler::{DueTask, TaskOutcome, TaskScheduler, TaskTag};
use crate::store::{LocalContext, LocalStore};
use crate::transport::{HttpClient, OutboundRequest};
use crate::util::unix_millis_now;

use super::protocol::{refresh_url, sync_url, ParsedBatch, RefreshResponse};

/// Knobs the orchestrator needs from the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub scope: String,
    /// Local schema version reported to the backend
    pub db_version: i32,
    /// Upper bound on back-to-back pulls in one manual run
    pub max_manual_passes: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            db_version: LOCAL_STORE_VERSION,
            max_manual_passes: 100,
        }
    }
}

/// Why a pull did not produce a batch.
#[derive(Debug)]
enum PullFailure {
    Database(String),
    Network(String),
    BadResponse { status: StatusCode },
    BadJson,
}

impl PullFailure {
    fn into_status(self, timestamp: i64, last_chance: bool) -> SyncStatus {
        match self {
            Self::Database(message) => SyncStatus::DatabaseError { message, timestamp },
            Self::Network(message) => SyncStatus::NetworkError {
                message,
                timestamp,
                will_retry: !last_chance,
            },
            Self::BadResponse { status } => SyncStatus::BadResponse {
                timestamp,
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            },
            Self::BadJson => SyncStatus::BadJson { timestamp },
        }
    }
}

/// Pulls changesets from the backend and commits them to the local store.
///
/// The orchestrator is the only writer of records and sync metadata.
pub struct SyncOrchestrator<C> {
    context: LocalContext,
    credentials: CredentialCache,
    client: C,
    scheduler: TaskScheduler,
    settings: SyncSettings,
}

impl<C: HttpClient> SyncOrchestrator<C> {
    pub const fn new(
        context: LocalContext,
        credentials: CredentialCache,
        client: C,
        scheduler: TaskScheduler,
        settings: SyncSettings,
    ) -> Self {
        Self {
            context,
            credentials,
            client,
            scheduler,
            settings,
        }
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Current metadata without creating the store.
    pub async fn metadata(&self) -> crate::Result<SyncMetadata> {
        match self.context.existing_store().await? {
            Some(store) => store.load_metadata(&self.settings.scope).await,
            None => Ok(SyncMetadata::default()),
        }
    }

    /// Run pulls back to back until the backend owes nothing, a pass fails,
    /// or the pass limit is reached.
    ///
    /// A network failure or an exhausted pass limit hands the remaining work
    /// to the deferred `SyncData` task.
    pub async fn run_manual(&self) -> SyncMetadata {
        let mut passes = 0;
        loop {
            let metadata = self.attempt(false).await;
            passes += 1;

            match &metadata.status {
                SyncStatus::NetworkError { .. } => {
                    self.scheduler.register(TaskTag::SyncData);
                    return metadata;
                }
                SyncStatus::Success { .. } if metadata.remaining > 0 => {
                    if passes >= self.settings.max_manual_passes {
                        tracing::warn!(
                            "Stopping manual sync after {passes} passes with {} records remaining",
                            metadata.remaining
                        );
                        self.scheduler.register(TaskTag::SyncData);
                        return metadata;
                    }
                }
                _ => return metadata,
            }
        }
    }

    /// Run one pull on behalf of the deferred `SyncData` task.
    pub async fn run_background(&self, task: DueTask) -> TaskOutcome {
        let metadata = self.attempt(task.last_chance).await;
        match metadata.status {
            SyncStatus::NetworkError { .. } if !task.last_chance => TaskOutcome::Retry,
            SyncStatus::Success { .. } if metadata.remaining > 0 => {
                self.scheduler.register(TaskTag::SyncData);
                TaskOutcome::Done
            }
            _ => TaskOutcome::Done,
        }
    }

    /// One sync attempt. The resulting metadata is persisted when the store is
    /// reachable and returned either way.
    pub async fn attempt(&self, last_chance: bool) -> SyncMetadata {
        let scope = self.settings.scope.as_str();
        let store = match self.context.store().await {
            Ok(store) => store,
            Err(error) => {
                tracing::warn!("Local store unavailable: {error}");
                let now = unix_millis_now();
                return SyncMetadata {
                    status: SyncStatus::DatabaseError {
                        message: error.to_string(),
                        timestamp: now,
                    },
                    last_contact: now,
                    ..SyncMetadata::default()
                };
            }
        };

        let previous = match store.load_metadata(scope).await {
            Ok(metadata) => metadata,
            Err(error) => {
                return self
                    .finish_failed(
                        &store,
                        SyncMetadata::default(),
                        PullFailure::Database(error.to_string()),
                        last_chance,
                    )
                    .await;
            }
        };

        let credentials = match self.credentials.load().await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                let now = unix_millis_now();
                tracing::info!("Sync skipped for scope {scope}: device is not paired");
                let metadata = SyncMetadata {
                    status: SyncStatus::NoCredentials { timestamp: now },
                    last_contact: now,
                    ..previous
                };
                self.persist(&store, &metadata).await;
                return metadata;
            }
            Err(error) => {
                return self
                    .finish_failed(
                        &store,
                        previous,
                        PullFailure::Database(error.to_string()),
                        last_chance,
                    )
                    .await;
            }
        };

        let base_revision = match store.max_vid(scope).await {
            Ok(revision) => revision,
            Err(error) => {
                return self
                    .finish_failed(
                        &store,
                        previous,
                        PullFailure::Database(error.to_string()),
                        last_chance,
                    )
                    .await;
            }
        };

        let now = unix_millis_now();
        let loading = SyncMetadata {
            status: SyncStatus::Loading {
                revision: base_revision,
                timestamp: now,
            },
            last_contact: now,
            ..previous.clone()
        };
        if let Err(error) = store.save_metadata(scope, &loading).await {
            return self
                .finish_failed(
                    &store,
                    previous,
                    PullFailure::Database(error.to_string()),
                    last_chance,
                )
                .await;
        }
        tracing::info!("Pulling scope {scope} from revision {base_revision}");

        let batch = match self.pull(credentials, base_revision).await {
            Ok(batch) => batch,
            Err(failure) => {
                return self
                    .finish_failed(&store, loading, failure, last_chance)
                    .await;
            }
        };

        if let Err(error) = store.apply_batch(scope, &batch.records).await {
            return self
                .finish_failed(
                    &store,
                    loading,
                    PullFailure::Database(error.to_string()),
                    last_chance,
                )
                .await;
        }

        let now = unix_millis_now();
        let metadata = SyncMetadata {
            status: SyncStatus::Success { timestamp: now },
            last_timestamp: if batch.last_timestamp > 0 {
                batch.last_timestamp
            } else {
                loading.last_timestamp
            },
            last_contact: now,
            remaining: batch.remaining(),
        };
        tracing::info!(
            "Sync of scope {scope} applied {} records, {} remaining",
            batch.records.len(),
            metadata.remaining
        );

        if let Err(error) = store.save_metadata(scope, &metadata).await {
            return self
                .finish_failed(
                    &store,
                    metadata,
                    PullFailure::Database(error.to_string()),
                    last_chance,
                )
                .await;
        }
        metadata
    }

    /// Issue the pull, refreshing the token pair at most once on a 401.
    async fn pull(
        &self,
        mut credentials: Credentials,
        base_revision: i64,
    ) -> Result<ParsedBatch, PullFailure> {
        let mut refreshed = false;
        loop {
            let url = sync_url(
                &credentials,
                base_revision,
                self.settings.db_version,
                &self.settings.scope,
            )
            .map_err(|error| PullFailure::Network(format!("invalid backend URL: {error}")))?;

            let response = self
                .client
                .execute(OutboundRequest::get(url).header("accept", "application/json"))
                .await
                .map_err(|error| PullFailure::Network(error.to_string()))?;

            if response.status == StatusCode::UNAUTHORIZED && !refreshed {
                tracing::info!("Access token rejected; refreshing");
                credentials = self.refresh(&credentials).await?;
                refreshed = true;
                continue;
            }
            if !response.is_success() {
                tracing::warn!(
                    "Sync request failed with HTTP {}: {}",
                    response.status.as_u16(),
                    response.body_excerpt()
                );
                return Err(PullFailure::BadResponse {
                    status: response.status,
                });
            }

            return ParsedBatch::parse(&response.body).map_err(|error| {
                tracing::warn!("Rejecting sync response: {error}");
                PullFailure::BadJson
            });
        }
    }

    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, PullFailure> {
        let response = self
            .client
            .execute(
                OutboundRequest::get(refresh_url(credentials)).header("accept", "application/json"),
            )
            .await
            .map_err(|error| PullFailure::Network(error.to_string()))?;

        if !response.is_success() {
            tracing::warn!(
                "Token refresh failed with HTTP {}",
                response.status.as_u16()
            );
            return Err(PullFailure::BadResponse {
                status: response.status,
            });
        }

        let tokens = RefreshResponse::parse(&response.body).map_err(|error| {
            tracing::warn!("Rejecting refresh response: {error}");
            PullFailure::BadJson
        })?;
        self.credentials
            .refresh_tokens(tokens.access_token, tokens.refresh_token)
            .await
            .map_err(|error| PullFailure::Database(error.to_string()))
    }

    async fn finish_failed(
        &self,
        store: &LocalStore,
        base: SyncMetadata,
        failure: PullFailure,
        last_chance: bool,
    ) -> SyncMetadata {
        let now = unix_millis_now();
        let status = failure.into_status(now, last_chance);
        tracing::warn!(
            "Sync of scope {} ended with {}",
            self.settings.scope,
            status.label()
        );
        let metadata = SyncMetadata {
            status,
            last_contact: now,
            ..base
        };
        self.persist(store, &metadata).await;
        metadata
    }

    async fn persist(&self, store: &LocalStore, metadata: &SyncMetadata) {
        if let Err(error) = store.save_metadata(&self.settings.scope, metadata).await {
            tracing::warn!("Failed to persist sync metadata: {error}");
        }
    }
}
