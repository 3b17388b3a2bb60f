//! Store-and-forward delivery of error reports.

use std::fmt;

use http::Method;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStore, ERROR_REPORTS_CACHE};
use crate::db::CachedResponse;
use crate::scheduler::{TaskOutcome, TaskScheduler, TaskTag};
use crate::transport::{HttpClient, InboundResponse, OutboundBody, OutboundRequest};
use crate::{Error, Result};

/// An outbound error report, as captured from the application.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingErrorReport {
    pub method: String,
    pub url: String,
    pub access_token: String,
    pub body: String,
}

impl PendingErrorReport {
    fn to_request(&self) -> Result<OutboundRequest> {
        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|error| Error::InvalidInput(format!("invalid report method: {error}")))?;
        let mut request = OutboundRequest::new(method, self.url.clone()).body(OutboundBody::Bytes {
            content_type: Some("application/json".to_string()),
            bytes: self.body.clone().into_bytes(),
        });
        if !self.access_token.is_empty() {
            request = request.header("authorization", format!("Bearer {}", self.access_token));
        }
        Ok(request)
    }
}

impl fmt::Debug for PendingErrorReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PendingErrorReport")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("access_token", &"[REDACTED]")
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Outcome of a direct send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered(InboundResponse),
    /// The backend was unreachable; the report waits for the next drain.
    Queued,
}

/// Outcome of one drain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
    pub stopped_on_failure: bool,
}

/// Forwards error reports, queueing them while the backend is unreachable.
#[derive(Clone)]
pub struct TelemetryForwarder<C> {
    cache: CacheStore,
    client: C,
    scheduler: TaskScheduler,
}

impl<C: HttpClient> TelemetryForwarder<C> {
    pub const fn new(cache: CacheStore, client: C, scheduler: TaskScheduler) -> Self {
        Self {
            cache,
            client,
            scheduler,
        }
    }

    /// Try the backend first; queue the report and register a drain if it
    /// cannot be reached. Any HTTP response counts as delivered.
    pub async fn send(&self, report: PendingErrorReport) -> Result<SendOutcome> {
        let request = report.to_request()?;
        match self.client.execute(request).await {
            Ok(response) => Ok(SendOutcome::Delivered(response)),
            Err(error) => {
                tracing::warn!("Error report not sent, queueing: {error}");
                self.enqueue(&report).await?;
                self.scheduler.register(TaskTag::SendErrorReports);
                Ok(SendOutcome::Queued)
            }
        }
    }

    /// Append a report to the back of the queue.
    pub async fn enqueue(&self, report: &PendingErrorReport) -> Result<()> {
        let key = uuid::Uuid::now_v7().to_string();
        let entry = CachedResponse::new(
            Some("application/json".to_string()),
            serde_json::to_vec(report)?,
        );
        self.cache.put(ERROR_REPORTS_CACHE, &key, &entry).await
    }

    pub async fn has_queued(&self) -> Result<bool> {
        Ok(!self.cache.keys(ERROR_REPORTS_CACHE).await?.is_empty())
    }

    /// Queued reports, oldest first.
    pub async fn queued(&self) -> Result<Vec<PendingErrorReport>> {
        let mut reports = Vec::new();
        for key in self.cache.keys(ERROR_REPORTS_CACHE).await? {
            if let Some(entry) = self.cache.get(ERROR_REPORTS_CACHE, &key).await? {
                reports.push(serde_json::from_slice(&entry.body)?);
            }
        }
        Ok(reports)
    }

    /// Resend queued reports oldest first, one at a time, stopping at the
    /// first failure.
    pub async fn drain(&self) -> Result<DrainReport> {
        let keys = self.cache.keys(ERROR_REPORTS_CACHE).await?;
        let mut report = DrainReport {
            remaining: keys.len(),
            ..DrainReport::default()
        };

        for key in keys {
            let Some(entry) = self.cache.get(ERROR_REPORTS_CACHE, &key).await? else {
                report.remaining = report.remaining.saturating_sub(1);
                continue;
            };

            let request = match serde_json::from_slice::<PendingErrorReport>(&entry.body)
                .map_err(Error::from)
                .and_then(|pending| pending.to_request())
            {
                Ok(request) => request,
                Err(error) => {
                    tracing::warn!("Discarding unreadable error report {key}: {error}");
                    self.cache.delete(ERROR_REPORTS_CACHE, &key).await?;
                    report.remaining = report.remaining.saturating_sub(1);
                    continue;
                }
            };

            if let Err(error) = self.client.execute(request).await {
                tracing::warn!(
                    "Error report drain stopped with {} queued: {error}",
                    report.remaining
                );
                report.stopped_on_failure = true;
                return Ok(report);
            }

            self.cache.delete(ERROR_REPORTS_CACHE, &key).await?;
            report.delivered += 1;
            report.remaining = report.remaining.saturating_sub(1);
        }

        if report.delivered > 0 {
            tracing::info!("Delivered {} queued error reports", report.delivered);
        }
        Ok(report)
    }

    /// Run a drain on behalf of the deferred `SendErrorReports` task.
    pub async fn run_background(&self) -> TaskOutcome {
        match self.drain().await {
            Ok(report) if report.stopped_on_failure => TaskOutcome::Retry,
            Ok(_) => TaskOutcome::Done,
            Err(error) => {
                tracing::warn!("Error report drain failed: {error}");
                TaskOutcome::Done
            }
        }
    }
}
