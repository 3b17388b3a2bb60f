//! Background worker: one cooperative event loop owning the engine.
//!
//! The worker handles one event chain at a time: intercepted requests, manual
//! messages from the foreground, connectivity signals, and deferred tasks
//! coming due on the scheduler.

use http::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::engine::Engine;
use crate::router::{into_http_response, Handled, Router};
use crate::scheduler::{DueTask, TaskOutcome, TaskScheduler, TaskTag};
use crate::sync::SyncOrchestrator;
use crate::telemetry::TelemetryForwarder;
use crate::transport::{HttpClient, OutboundBody, OutboundRequest};

/// Connection-level headers that never cross to the backend.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Messages the foreground application posts to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum WorkerMessage {
    /// Run one manual sync pass.
    SyncData,
}

/// Everything the event loop reacts to.
#[derive(Debug)]
pub enum WorkerEvent {
    Fetch {
        request: Request<Vec<u8>>,
        reply: oneshot::Sender<Response<Vec<u8>>>,
    },
    Message(WorkerMessage),
    ConnectivityRestored,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is not running")]
    Closed,
}

/// Cloneable sender side used by the foreground and the local API server.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    events: mpsc::Sender<WorkerEvent>,
}

impl WorkerHandle {
    /// Create a handle and the receiver to pass to [`Worker::run`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WorkerEvent>) {
        let (events, receiver) = mpsc::channel(capacity);
        (Self { events }, receiver)
    }

    /// Intercept a request and wait for the worker's response.
    pub async fn fetch(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, WorkerError> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerEvent::Fetch { request, reply }).await?;
        response.await.map_err(|_| WorkerError::Closed)
    }

    pub async fn post_message(&self, message: WorkerMessage) -> Result<(), WorkerError> {
        self.send(WorkerEvent::Message(message)).await
    }

    pub async fn connectivity_restored(&self) -> Result<(), WorkerError> {
        self.send(WorkerEvent::ConnectivityRestored).await
    }

    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.send(WorkerEvent::Shutdown).await
    }

    async fn send(&self, event: WorkerEvent) -> Result<(), WorkerError> {
        self.events
            .send(event)
            .await
            .map_err(|_| WorkerError::Closed)
    }
}

/// The event loop and the components it drives.
pub struct Worker<C> {
    router: Router<C>,
    orchestrator: SyncOrchestrator<C>,
    telemetry: TelemetryForwarder<C>,
    scheduler: TaskScheduler,
    client: C,
}

impl<C: HttpClient + Clone> Worker<C> {
    pub fn new(engine: &Engine<C>) -> Self {
        Self {
            router: engine.router(),
            orchestrator: engine.orchestrator(),
            telemetry: engine.telemetry(),
            scheduler: engine.scheduler.clone(),
            client: engine.client.clone(),
        }
    }

    /// Process events until shutdown or until every handle is dropped.
    pub async fn run(self, mut events: mpsc::Receiver<WorkerEvent>) {
        tracing::info!("Worker started");
        self.resume_pending().await;
        loop {
            let next_due = self.scheduler.next_due_at();
            tokio::select! {
                event = events.recv() => match event {
                    None | Some(WorkerEvent::Shutdown) => break,
                    Some(event) => self.handle_event(event).await,
                },
                () = wait_until(next_due) => self.run_due_tasks().await,
                () = self.scheduler.changed() => {}
            }
        }
        tracing::info!("Worker stopped");
    }

    async fn handle_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Fetch { request, reply } => {
                let response = self.fetch(request).await;
                if reply.send(response).is_err() {
                    tracing::debug!("Requester went away before the response was ready");
                }
            }
            WorkerEvent::Message(WorkerMessage::SyncData) => {
                let metadata = self.orchestrator.run_manual().await;
                tracing::info!(
                    "Manual sync finished: {} ({} remaining)",
                    metadata.status.label(),
                    metadata.remaining
                );
            }
            WorkerEvent::ConnectivityRestored => self.scheduler.connectivity_restored(),
            WorkerEvent::Shutdown => {}
        }
    }

    /// Re-register deferred tasks whose work survived a restart in the store or cache.
    pub async fn resume_pending(&self) {
        match self.orchestrator.metadata().await {
            Ok(metadata) if metadata.has_unfinished_work() => {
                tracing::info!(
                    "Resuming deferred sync after {} ({} remaining)",
                    metadata.status.label(),
                    metadata.remaining
                );
                self.scheduler.register(TaskTag::SyncData);
            }
            Ok(_) => {}
            Err(error) => tracing::warn!("Could not read sync state on startup: {error}"),
        }

        match self.telemetry.has_queued().await {
            Ok(true) => {
                tracing::info!("Resuming delivery of queued error reports");
                self.scheduler.register(TaskTag::SendErrorReports);
            }
            Ok(false) => {}
            Err(error) => tracing::warn!("Could not read the error report queue on startup: {error}"),
        }
    }

    /// Run every deferred task that is due now.
    pub async fn run_due_tasks(&self) {
        for task in self.scheduler.take_due(Instant::now()) {
            let outcome = self.run_task(task).await;
            self.scheduler.complete(task, outcome);
        }
    }

    async fn run_task(&self, task: DueTask) -> TaskOutcome {
        tracing::debug!(
            "Running deferred task {:?} (attempt {}, last chance: {})",
            task.tag,
            task.attempt + 1,
            task.last_chance
        );
        match task.tag {
            TaskTag::SyncData => self.orchestrator.run_background(task).await,
            TaskTag::SendErrorReports => self.telemetry.run_background().await,
        }
    }

    /// Answer locally or forward to the network.
    pub async fn fetch(&self, request: Request<Vec<u8>>) -> Response<Vec<u8>> {
        match self.router.handle(request).await {
            Handled::Local(response) => response,
            Handled::PassThrough(request) => self.forward(request).await,
        }
    }

    async fn forward(&self, request: Request<Vec<u8>>) -> Response<Vec<u8>> {
        let url = match self.router.absolute_url(&request).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    "device is not paired with a backend",
                )
            }
            Err(error) => return error.into_response(),
        };

        let (parts, body) = request.into_parts();
        let headers = parts
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let outbound = OutboundRequest {
            method: parts.method,
            url,
            headers,
            body: if body.is_empty() {
                OutboundBody::Empty
            } else {
                OutboundBody::Bytes {
                    content_type: None,
                    bytes: body,
                }
            },
        };

        match self.client.execute(outbound).await {
            Ok(response) => into_http_response(response),
            Err(error) => error_response(StatusCode::BAD_GATEWAY, &error.to_string()),
        }
    }
}

fn is_hop_by_hop(name: &http::HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Vec<u8>> {
    let mut response = Response::new(json!({ "error": message }).to_string().into_bytes());
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}
