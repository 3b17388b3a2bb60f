//! Local emulation of the backend REST API.
//!
//! Requests are matched against a fixed routing table; anything that does not
//! match is handed back untouched so the caller can send it to the network.

use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::cache::{CacheStore, CredentialCache, CONFIG_CACHE};
use crate::db::CachedResponse;
use crate::store::LocalContext;
use crate::telemetry::{PendingErrorReport, SendOutcome, TelemetryForwarder};
use crate::transport::{HttpClient, InboundResponse};
use crate::uploads::{Delivery, DeliveryRequest, UploadQueue};

const JSON: &str = "application/json";
const PHOTO_PATH_MARKER: &str = "/system/files/";

/// Request verbs the routing table distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Put,
    Post,
    Delete,
}

impl Verb {
    fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::PUT => Some(Self::Put),
            Method::POST => Some(Self::Post),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    GetConfig,
    PutConfig,
    DeleteConfig,
    ListNodes,
    GetNode,
    Statistics,
    Computed,
    CaptureUpload,
    GetPendingUpload,
    DeletePendingUpload,
    DeliverUpload,
    TelemetryReport,
}

/// `{name}` segments capture one path segment.
const ROUTES: [(Verb, &str, RouteKind); 12] = [
    (Verb::Get, "/config/{key}", RouteKind::GetConfig),
    (Verb::Put, "/config/{key}", RouteKind::PutConfig),
    (Verb::Delete, "/config/{key}", RouteKind::DeleteConfig),
    (Verb::Get, "/nodes/{type}", RouteKind::ListNodes),
    (Verb::Get, "/nodes/{type}/{id}", RouteKind::GetNode),
    (Verb::Get, "/statistics", RouteKind::Statistics),
    (Verb::Get, "/computed/{type}", RouteKind::Computed),
    (Verb::Post, "/cache-upload/images", RouteKind::CaptureUpload),
    (Verb::Get, "/cache-upload/images/{n}", RouteKind::GetPendingUpload),
    (Verb::Delete, "/cache-upload/images/{n}", RouteKind::DeletePendingUpload),
    (Verb::Post, "/backend-upload/images", RouteKind::DeliverUpload),
    (Verb::Post, "/telemetry/report", RouteKind::TelemetryReport),
];

/// A matched route with its path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    GetConfig { key: String },
    PutConfig { key: String },
    DeleteConfig { key: String },
    ListNodes { node_type: String },
    GetNode { node_type: String, id: String },
    Statistics,
    Computed { node_type: String },
    CaptureUpload,
    GetPendingUpload { url: String },
    DeletePendingUpload { url: String },
    DeliverUpload,
    Photo,
    TelemetryReport,
}

impl Route {
    /// Match a method and path against the routing table.
    pub fn resolve(method: &Method, path: &str) -> Option<Self> {
        let verb = Verb::from_method(method)?;
        if verb == Verb::Get && path.contains(PHOTO_PATH_MARKER) {
            return Some(Self::Photo);
        }

        let segments: Vec<&str> = path
            .trim_end_matches('/')
            .split('/')
            .skip(1)
            .collect();
        ROUTES
            .iter()
            .filter(|(route_verb, _, _)| *route_verb == verb)
            .find_map(|(_, pattern, kind)| {
                match_pattern(pattern, &segments).map(|params| Self::build(*kind, &params, path))
            })
    }

    fn build(kind: RouteKind, params: &[String], path: &str) -> Self {
        let param = |index: usize| params.get(index).cloned().unwrap_or_default();
        match kind {
            RouteKind::GetConfig => Self::GetConfig { key: param(0) },
            RouteKind::PutConfig => Self::PutConfig { key: param(0) },
            RouteKind::DeleteConfig => Self::DeleteConfig { key: param(0) },
            RouteKind::ListNodes => Self::ListNodes {
                node_type: param(0),
            },
            RouteKind::GetNode => Self::GetNode {
                node_type: param(0),
                id: param(1),
            },
            RouteKind::Statistics => Self::Statistics,
            RouteKind::Computed => Self::Computed {
                node_type: param(0),
            },
            RouteKind::CaptureUpload => Self::CaptureUpload,
            RouteKind::GetPendingUpload => Self::GetPendingUpload {
                url: path.trim_end_matches('/').to_string(),
            },
            RouteKind::DeletePendingUpload => Self::DeletePendingUpload {
                url: path.trim_end_matches('/').to_string(),
            },
            RouteKind::DeliverUpload => Self::DeliverUpload,
            RouteKind::TelemetryReport => Self::TelemetryReport,
        }
    }
}

fn match_pattern(pattern: &str, segments: &[&str]) -> Option<Vec<String>> {
    let expected: Vec<&str> = pattern.split('/').skip(1).collect();
    if expected.len() != segments.len() {
        return None;
    }

    let mut params = Vec::new();
    for (expected, actual) in expected.iter().zip(segments) {
        if expected.starts_with('{') && expected.ends_with('}') {
            if actual.is_empty() {
                return None;
            }
            let decoded = urlencoding::decode(actual).map_or_else(
                |_| (*actual).to_string(),
                std::borrow::Cow::into_owned,
            );
            params.push(decoded);
        } else if expected != actual {
            return None;
        }
    }
    Some(params)
}

/// Errors a local handler reports to the caller.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Core(#[from] crate::Error),
}

impl RouterError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Core(error) if error.is_transport() => StatusCode::BAD_GATEWAY,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<Vec<u8>> {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Local handler failed: {self}");
        }
        json_response(status, &json!({ "error": self.to_string() }))
    }
}

/// What the router did with a request.
#[derive(Debug)]
pub enum Handled {
    /// Answered locally.
    Local(Response<Vec<u8>>),
    /// Not a local route; send it to the network unchanged.
    PassThrough(Request<Vec<u8>>),
}

/// Dispatches intercepted requests to local handlers.
#[derive(Clone)]
pub struct Router<C> {
    context: LocalContext,
    /// Records outside this scope are invisible to local reads
    scope: String,
    cache: CacheStore,
    credentials: CredentialCache,
    uploads: UploadQueue<C>,
    telemetry: TelemetryForwarder<C>,
}

impl<C: HttpClient> Router<C> {
    pub const fn new(
        context: LocalContext,
        scope: String,
        cache: CacheStore,
        credentials: CredentialCache,
        uploads: UploadQueue<C>,
        telemetry: TelemetryForwarder<C>,
    ) -> Self {
        Self {
            context,
            scope,
            cache,
            credentials,
            uploads,
            telemetry,
        }
    }

    /// Route a request. Local handlers always produce a well-formed response.
    pub async fn handle(&self, request: Request<Vec<u8>>) -> Handled {
        let Some(route) = Route::resolve(request.method(), request.uri().path()) else {
            tracing::debug!(
                "Passing {} {} through",
                request.method(),
                request.uri().path()
            );
            return Handled::PassThrough(request);
        };

        tracing::debug!("Handling {} {} locally as {route:?}", request.method(), request.uri().path());
        let response = self
            .dispatch(route, &request)
            .await
            .unwrap_or_else(RouterError::into_response);
        Handled::Local(response)
    }

    async fn dispatch(
        &self,
        route: Route,
        request: &Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, RouterError> {
        match route {
            Route::GetConfig { key } => self.get_config(&key).await,
            Route::PutConfig { key } => self.put_config(&key, request).await,
            Route::DeleteConfig { key } => {
                self.cache.delete(CONFIG_CACHE, &key).await?;
                Ok(empty_response(StatusCode::NO_CONTENT))
            }
            Route::ListNodes { node_type } => {
                let (offset, range) = parse_paging(request.uri().query())?;
                self.list_nodes(&node_type, offset, range).await
            }
            Route::GetNode { node_type, id } => self.get_node(&node_type, &id).await,
            Route::Statistics => self.statistics().await,
            Route::Computed { node_type } => self.list_nodes(&node_type, 0, None).await,
            Route::CaptureUpload => self.capture_upload(request).await,
            Route::GetPendingUpload { url } => {
                let entry = self
                    .uploads
                    .pending(&url)
                    .await?
                    .ok_or_else(|| RouterError::NotFound(format!("{url} is not cached")))?;
                Ok(cached_response(entry))
            }
            Route::DeletePendingUpload { url } => {
                self.uploads.remove_pending(&url).await?;
                Ok(empty_response(StatusCode::NO_CONTENT))
            }
            Route::DeliverUpload => self.deliver_upload(request).await,
            Route::Photo => self.photo(request).await,
            Route::TelemetryReport => self.telemetry_report(request).await,
        }
    }

    async fn get_config(&self, key: &str) -> Result<Response<Vec<u8>>, RouterError> {
        let entry = self
            .cache
            .get(CONFIG_CACHE, key)
            .await?
            .ok_or_else(|| RouterError::NotFound(format!("config {key} not found")))?;
        Ok(cached_response(entry))
    }

    async fn put_config(
        &self,
        key: &str,
        request: &Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, RouterError> {
        serde_json::from_slice::<Value>(request.body())
            .map_err(|error| RouterError::BadRequest(format!("config body must be JSON: {error}")))?;

        let entry = CachedResponse::new(Some(JSON.to_string()), request.body().clone());
        self.cache.put(CONFIG_CACHE, key, &entry).await?;

        let mut response = empty_response(StatusCode::CREATED);
        set_header(&mut response, LOCATION, request.uri().path());
        Ok(response)
    }

    async fn list_nodes(
        &self,
        node_type: &str,
        offset: usize,
        range: Option<usize>,
    ) -> Result<Response<Vec<u8>>, RouterError> {
        let body = match self.context.existing_store().await? {
            Some(store) => {
                let page = store
                    .list_nodes(&self.scope, node_type, offset, range)
                    .await?;
                serde_json::to_value(page).map_err(crate::Error::from)?
            }
            None => json!({"offset": offset, "count": 0, "data": []}),
        };
        Ok(json_response(StatusCode::OK, &body))
    }

    async fn get_node(&self, node_type: &str, id: &str) -> Result<Response<Vec<u8>>, RouterError> {
        let not_found = || RouterError::NotFound(format!("{node_type} {id} not found"));
        let id: i64 = id.parse().map_err(|_| not_found())?;
        let store = self.context.existing_store().await?.ok_or_else(not_found)?;
        let document = store
            .get_node(&self.scope, node_type, id)
            .await?
            .ok_or_else(not_found)?;
        Ok(json_response(StatusCode::OK, &json!({ "data": [document] })))
    }

    async fn statistics(&self) -> Result<Response<Vec<u8>>, RouterError> {
        let store = self
            .context
            .existing_store()
            .await?
            .ok_or_else(|| RouterError::NotFound("local store has not been created".into()))?;
        let page = store.list_statistics(&self.scope).await?;
        let body = serde_json::to_value(page).map_err(crate::Error::from)?;
        Ok(json_response(StatusCode::OK, &body))
    }

    async fn capture_upload(
        &self,
        request: &Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, RouterError> {
        if request.body().is_empty() {
            return Err(RouterError::BadRequest("upload body is empty".into()));
        }
        let content_type = header_str(request, CONTENT_TYPE).map(ToString::to_string);
        let url = self
            .uploads
            .capture(content_type, request.body().clone())
            .await?;

        let mut response = json_response(StatusCode::CREATED, &json!({ "url": url }));
        set_header(&mut response, LOCATION, &url);
        Ok(response)
    }

    async fn deliver_upload(
        &self,
        request: &Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, RouterError> {
        let delivery: DeliveryRequest = serde_json::from_slice(request.body()).map_err(|error| {
            RouterError::BadRequest(format!(
                "expected {{backendUrl, accessToken, cachedUrl}}: {error}"
            ))
        })?;

        match self.uploads.deliver(&delivery).await? {
            Delivery::NotCached => Err(RouterError::NotFound(format!(
                "{} is not cached",
                delivery.cached_url
            ))),
            Delivery::Forwarded(response) => Ok(into_http_response(response)),
        }
    }

    async fn photo(&self, request: &Request<Vec<u8>>) -> Result<Response<Vec<u8>>, RouterError> {
        let url = match self.absolute_url(request).await? {
            Some(url) => url,
            None => return Err(RouterError::NotFound("device is not paired".into())),
        };
        let response = self.uploads.fetch_photo(&url).await?;
        Ok(into_http_response(response))
    }

    async fn telemetry_report(
        &self,
        request: &Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, RouterError> {
        let report: PendingErrorReport = serde_json::from_slice(request.body()).map_err(|error| {
            RouterError::BadRequest(format!(
                "expected {{method, url, accessToken, body}}: {error}"
            ))
        })?;

        match self.telemetry.send(report).await? {
            SendOutcome::Delivered(response) => Ok(into_http_response(response)),
            SendOutcome::Queued => Ok(json_response(
                StatusCode::ACCEPTED,
                &json!({ "queued": true }),
            )),
        }
    }

    /// The request URL, rebased on the paired backend when it is relative.
    pub async fn absolute_url(
        &self,
        request: &Request<Vec<u8>>,
    ) -> Result<Option<String>, RouterError> {
        let uri = request.uri();
        if uri.scheme().is_some() {
            return Ok(Some(uri.to_string()));
        }

        let path_and_query = uri
            .path_and_query()
            .map_or_else(|| uri.path(), http::uri::PathAndQuery::as_str);
        Ok(self
            .credentials
            .load()
            .await?
            .map(|credentials| format!("{}{path_and_query}", credentials.backend_base())))
    }
}

/// Parse `offset` and `range`; `range` absent or zero means "to the end".
fn parse_paging(query: Option<&str>) -> Result<(usize, Option<usize>), RouterError> {
    let mut offset = 0;
    let mut range = None;
    for (name, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        let parse = |value: &str| {
            value.trim().parse::<usize>().map_err(|_| {
                RouterError::BadRequest(format!("{name} must be a non-negative integer"))
            })
        };
        match name.as_ref() {
            "offset" if !value.trim().is_empty() => offset = parse(&value)?,
            "range" if !value.trim().is_empty() => {
                range = Some(parse(&value)?).filter(|range| *range > 0);
            }
            _ => {}
        }
    }
    Ok((offset, range))
}

fn header_str<'a>(request: &'a Request<Vec<u8>>, name: HeaderName) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

fn set_header(response: &mut Response<Vec<u8>>, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

fn empty_response(status: StatusCode) -> Response<Vec<u8>> {
    let mut response = Response::new(Vec::new());
    *response.status_mut() = status;
    response
}

fn json_response(status: StatusCode, body: &Value) -> Response<Vec<u8>> {
    let mut response = Response::new(body.to_string().into_bytes());
    *response.status_mut() = status;
    set_header(&mut response, CONTENT_TYPE, JSON);
    response
}

fn cached_response(entry: CachedResponse) -> Response<Vec<u8>> {
    let mut response = Response::new(entry.body);
    if let Some(content_type) = entry.content_type {
        set_header(&mut response, CONTENT_TYPE, &content_type);
    }
    response
}

/// Convert a backend response into an HTTP response without altering it.
pub fn into_http_response(inbound: InboundResponse) -> Response<Vec<u8>> {
    let mut response = Response::new(inbound.body);
    *response.status_mut() = inbound.status;
    for (name, value) in inbound.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().append(name, value);
        }
    }
    response
}
