//! Photo caches: captured uploads waiting for delivery and confirmed photos.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::{CacheStore, PHOTOS_CACHE, PHOTOS_UPLOAD_CACHE};
use crate::db::CachedResponse;
use crate::transport::{HttpClient, InboundResponse, OutboundBody, OutboundRequest};
use crate::{Error, Result};

/// Local URL prefix of captured, not yet delivered photos.
pub const PENDING_UPLOAD_PREFIX: &str = "/cache-upload/images/";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Body of `POST /backend-upload/images`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub backend_url: String,
    pub access_token: String,
    pub cached_url: String,
}

impl fmt::Debug for DeliveryRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DeliveryRequest")
            .field("backend_url", &self.backend_url)
            .field("access_token", &"[REDACTED]")
            .field("cached_url", &self.cached_url)
            .finish()
    }
}

/// Result of a proxy delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The cached blob no longer exists; the backend was not contacted.
    NotCached,
    /// The backend's response, unmodified.
    Forwarded(InboundResponse),
}

/// Store-and-forward queue for captured photos plus a read-through cache of
/// confirmed ones.
#[derive(Clone)]
pub struct UploadQueue<C> {
    cache: CacheStore,
    client: C,
}

impl<C: HttpClient> UploadQueue<C> {
    pub const fn new(cache: CacheStore, client: C) -> Self {
        Self { cache, client }
    }

    /// Store a captured blob under the lowest unused local URL and return it.
    pub async fn capture(&self, content_type: Option<String>, bytes: Vec<u8>) -> Result<String> {
        let used: BTreeSet<u64> = self
            .cache
            .keys(PHOTOS_UPLOAD_CACHE)
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix(PENDING_UPLOAD_PREFIX))
            .filter_map(|suffix| suffix.parse().ok())
            .collect();
        let suffix = (0..).find(|n| !used.contains(n)).unwrap_or_default();
        let url = format!("{PENDING_UPLOAD_PREFIX}{suffix}");

        let content_type = content_type.filter(|value| !value.trim().is_empty());
        self.cache
            .put(
                PHOTOS_UPLOAD_CACHE,
                &url,
                &CachedResponse::new(content_type, bytes),
            )
            .await?;
        tracing::info!("Captured pending upload {url}");
        Ok(url)
    }

    pub async fn pending(&self, url: &str) -> Result<Option<CachedResponse>> {
        self.cache
            .get(PHOTOS_UPLOAD_CACHE, &pending_key(url))
            .await
    }

    pub async fn pending_urls(&self) -> Result<Vec<String>> {
        self.cache.keys(PHOTOS_UPLOAD_CACHE).await
    }

    /// Drop a pending upload once the caller knows the backend kept it.
    pub async fn remove_pending(&self, url: &str) -> Result<bool> {
        let removed = self
            .cache
            .delete(PHOTOS_UPLOAD_CACHE, &pending_key(url))
            .await?;
        if removed {
            tracing::info!("Removed pending upload {}", pending_key(url));
        }
        Ok(removed)
    }

    /// Re-post a pending upload to the backend as `multipart/form-data`.
    ///
    /// The pending entry is kept; cleanup is the caller's decision.
    pub async fn deliver(&self, request: &DeliveryRequest) -> Result<Delivery> {
        let key = pending_key(&request.cached_url);
        let Some(entry) = self.cache.get(PHOTOS_UPLOAD_CACHE, &key).await? else {
            tracing::warn!("Pending upload {key} is not cached");
            return Ok(Delivery::NotCached);
        };

        let content_type = entry
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let file_name = upload_file_name(&key, &content_type);
        let url = file_upload_url(&request.backend_url, &request.access_token)?;

        let outbound = OutboundRequest::post(url).body(OutboundBody::Multipart {
            field: "file".to_string(),
            file_name,
            content_type,
            bytes: entry.body,
        });
        let response = self.client.execute(outbound).await?;
        tracing::info!(
            "Delivered {key} to backend: HTTP {}",
            response.status.as_u16()
        );
        Ok(Delivery::Forwarded(response))
    }

    /// Serve a confirmed photo from the cache, fetching and caching it on a miss.
    ///
    /// Only successful responses are cached.
    pub async fn fetch_photo(&self, url: &str) -> Result<InboundResponse> {
        if let Some(entry) = self.cache.get(PHOTOS_CACHE, url).await? {
            tracing::debug!("Photo cache hit for {url}");
            return Ok(cached_to_response(entry));
        }

        let response = self.client.execute(OutboundRequest::get(url)).await?;
        if response.is_success() {
            let entry = CachedResponse::new(
                response.content_type().map(ToString::to_string),
                response.body.clone(),
            );
            self.cache.put(PHOTOS_CACHE, url, &entry).await?;
        }
        Ok(response)
    }
}

/// Cache key for a pending upload given either its local path or a full URL.
fn pending_key(url: &str) -> String {
    url.find(PENDING_UPLOAD_PREFIX)
        .map_or_else(|| url.to_string(), |start| url[start..].to_string())
}

fn upload_file_name(key: &str, content_type: &str) -> String {
    let stem = key
        .strip_prefix(PENDING_UPLOAD_PREFIX)
        .map_or_else(|| "upload".to_string(), |suffix| format!("image-{suffix}"));
    format!("{stem}.{}", file_extension(content_type))
}

/// Camera formats get their usual extension; mime_guess lists alternatives first for some.
fn file_extension(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "image/heif" => "heif",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|extensions| extensions.first())
            .copied()
            .unwrap_or("bin"),
    }
}

fn file_upload_url(backend_url: &str, access_token: &str) -> Result<String> {
    let base = backend_url.trim().trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/file-upload"))
        .map_err(|error| Error::InvalidInput(format!("invalid backendUrl: {error}")))?;
    url.query_pairs_mut()
        .append_pair("access_token", access_token);
    Ok(url.into())
}

fn cached_to_response(entry: CachedResponse) -> InboundResponse {
    let mut response = InboundResponse::new(http::StatusCode::OK, entry.body);
    if let Some(content_type) = entry.content_type {
        response
            .headers
            .push(("content-type".to_string(), content_type));
    }
    response
}
