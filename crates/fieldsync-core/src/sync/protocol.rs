//! Backend pull protocol: URLs and response bodies.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::models::{Credentials, Record, RecordError, DEFAULT_SCOPE};
use crate::util::lenient_i64;

/// Reasons a 2xx pull or refresh body is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("body is not valid JSON: {0}")]
    Json(String),
    #[error("body is missing `{0}`")]
    MissingField(&'static str),
    #[error("batch record {index} rejected: {source}")]
    Record {
        index: usize,
        #[source]
        source: RecordError,
    },
}

/// One pulled batch after coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch {
    pub records: Vec<Record>,
    pub last_timestamp: i64,
    /// Records the backend holds after the requested revision, this batch included
    pub revision_count: i64,
}

impl ParsedBatch {
    /// Parse `{data: {batch: [...], last_timestamp, revision_count}}`.
    ///
    /// A single bad record rejects the whole batch.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|error| ProtocolError::Json(error.to_string()))?;
        let data = value
            .get("data")
            .filter(|data| data.is_object())
            .ok_or(ProtocolError::MissingField("data"))?;
        let batch = data
            .get("batch")
            .and_then(Value::as_array)
            .ok_or(ProtocolError::MissingField("data.batch"))?;
        let revision_count = data
            .get("revision_count")
            .and_then(lenient_i64)
            .ok_or(ProtocolError::MissingField("data.revision_count"))?;
        let last_timestamp = data
            .get("last_timestamp")
            .and_then(lenient_i64)
            .unwrap_or_default();

        let records = batch
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, document)| {
                Record::from_value(document)
                    .map_err(|source| ProtocolError::Record { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            records,
            last_timestamp,
            revision_count,
        })
    }

    /// Highest revision in the batch, if any.
    pub fn max_vid(&self) -> Option<i64> {
        self.records.iter().map(|record| record.vid).max()
    }

    /// Records still owed after this batch is applied.
    pub fn remaining(&self) -> i64 {
        let delivered = i64::try_from(self.records.len()).unwrap_or(i64::MAX);
        self.revision_count.saturating_sub(delivered).max(0)
    }
}

/// `GET /refresh-token/{refresh_token}` response body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl RefreshResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let response: Self = serde_json::from_slice(body)
            .map_err(|error| ProtocolError::Json(error.to_string()))?;
        if response.access_token.trim().is_empty() {
            return Err(ProtocolError::MissingField("access_token"));
        }
        if response.refresh_token.trim().is_empty() {
            return Err(ProtocolError::MissingField("refresh_token"));
        }
        Ok(response)
    }
}

/// Build the pull URL; the scope is only sent when it is not the default one.
pub fn sync_url(
    credentials: &Credentials,
    base_revision: i64,
    db_version: i32,
    scope: &str,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&format!("{}/sync", credentials.backend_base()))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("base_revision", &base_revision.to_string())
            .append_pair("access_token", &credentials.access_token)
            .append_pair("db_version", &db_version.to_string());
        if scope != DEFAULT_SCOPE {
            query.append_pair("scope", scope);
        }
    }
    Ok(url.into())
}

pub fn refresh_url(credentials: &Credentials) -> String {
    format!(
        "{}/refresh-token/{}",
        credentials.backend_base(),
        urlencoding::encode(&credentials.refresh_token)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials::new("https://backend.test/", "tok en", "ref/resh").unwrap()
    }

    #[test]
    fn parses_batch_with_string_counters() {
        let body = json!({
            "data": {
                "batch": [
                    {"id": "1", "vid": "10", "type": "person"},
                    {"id": 2, "vid": 11, "type": "session"}
                ],
                "last_timestamp": "1700000000",
                "revision_count": "120"
            }
        });

        let batch = ParsedBatch::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].id, 1);
        assert_eq!(batch.last_timestamp, 1_700_000_000);
        assert_eq!(batch.revision_count, 120);
        assert_eq!(batch.remaining(), 118);
        assert_eq!(batch.max_vid(), Some(11));
    }

    #[test]
    fn rejects_whole_batch_on_one_bad_record() {
        let body = json!({
            "data": {
                "batch": [
                    {"id": 1, "vid": 10, "type": "person"},
                    {"id": "x", "vid": 11, "type": "person"}
                ],
                "revision_count": 2
            }
        });

        let error = ParsedBatch::parse(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(error, ProtocolError::Record { index: 1, .. }));
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(matches!(
            ParsedBatch::parse(b"<html>"),
            Err(ProtocolError::Json(_))
        ));
        assert_eq!(
            ParsedBatch::parse(br#"{"batch": []}"#).unwrap_err(),
            ProtocolError::MissingField("data")
        );
        assert_eq!(
            ParsedBatch::parse(br#"{"data": {"batch": []}}"#).unwrap_err(),
            ProtocolError::MissingField("data.revision_count")
        );
    }

    #[test]
    fn remaining_never_goes_negative() {
        let body = json!({"data": {"batch": [{"id": 1, "vid": 1, "type": "t"}], "revision_count": 0}});
        let batch = ParsedBatch::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(batch.remaining(), 0);
    }

    #[test]
    fn builds_sync_and_refresh_urls() {
        let credentials = credentials();
        assert_eq!(
            sync_url(&credentials, 50, 2, DEFAULT_SCOPE).unwrap(),
            "https://backend.test/sync?base_revision=50&access_token=tok+en&db_version=2"
        );
        assert!(sync_url(&credentials, 0, 2, "clinic-7")
            .unwrap()
            .ends_with("&scope=clinic-7"));
        assert_eq!(
            refresh_url(&credentials),
            "https://backend.test/refresh-token/ref%2Fresh"
        );
    }

    #[test]
    fn refresh_response_requires_both_tokens() {
        assert!(RefreshResponse::parse(br#"{"access_token": "a", "refresh_token": "r"}"#).is_ok());
        assert!(RefreshResponse::parse(br#"{"access_token": "", "refresh_token": "r"}"#).is_err());
        assert!(RefreshResponse::parse(b"nope").is_err());
    }
}
