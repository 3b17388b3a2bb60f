//! Sync status model

use serde::{Deserialize, Serialize};

/// Well-known scope every device syncs today.
pub const DEFAULT_SCOPE: &str = "default";

/// Outcome of the most recent sync attempt for a scope.
///
/// Serialized with a `tag` discriminator so the UI can switch on it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "tag")]
pub enum SyncStatus {
    /// No attempt has been made yet.
    #[default]
    NotAsked,
    /// An attempt is in flight, pulling changes after `revision`.
    Loading { revision: i64, timestamp: i64 },
    /// The local store failed; never retried automatically.
    DatabaseError { message: String, timestamp: i64 },
    /// The backend could not be reached.
    #[serde(rename_all = "camelCase")]
    NetworkError {
        message: String,
        timestamp: i64,
        will_retry: bool,
    },
    /// The device has not been paired with a backend.
    NoCredentials { timestamp: i64 },
    /// The backend answered with an unexpected status.
    #[serde(rename_all = "camelCase")]
    BadResponse {
        timestamp: i64,
        status: u16,
        status_text: String,
    },
    /// The backend answered 2xx with a body that does not follow the protocol.
    BadJson { timestamp: i64 },
    /// The batch was committed.
    Success { timestamp: i64 },
}

impl SyncStatus {
    /// Short label for logs and the CLI.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotAsked => "NotAsked",
            Self::Loading { .. } => "Loading",
            Self::DatabaseError { .. } => "DatabaseError",
            Self::NetworkError { .. } => "NetworkError",
            Self::NoCredentials { .. } => "NoCredentials",
            Self::BadResponse { .. } => "BadResponse",
            Self::BadJson { .. } => "BadJson",
            Self::Success { .. } => "Success",
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError { .. }
                | Self::NetworkError { .. }
                | Self::NoCredentials { .. }
                | Self::BadResponse { .. }
                | Self::BadJson { .. }
        )
    }

    /// Only network failures are handed back to the deferred-retry scheduler.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError { .. })
    }
}

/// Progress and outcome of synchronization for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncMetadata {
    #[serde(default)]
    pub status: SyncStatus,
    /// Backend clock of the last applied batch.
    #[serde(default)]
    pub last_timestamp: i64,
    /// Local clock (unix ms) of the last attempt.
    #[serde(default)]
    pub last_contact: i64,
    /// Records the backend still owes after the last applied batch.
    #[serde(default)]
    pub remaining: i64,
}

impl SyncMetadata {
    /// Whether a deferred pull should be running for this scope: a retryable
    /// failure, an attempt cut short by a restart, or records still owed.
    pub const fn has_unfinished_work(&self) -> bool {
        match self.status {
            SyncStatus::NetworkError { will_retry, .. } => will_retry,
            SyncStatus::Loading { .. } => true,
            SyncStatus::Success { .. } => self.remaining > 0,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn serializes_with_tag_and_camel_case_payload() {
        let status = SyncStatus::NetworkError {
            message: "offline".into(),
            timestamp: 10,
            will_retry: true,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"tag": "NetworkError", "message": "offline", "timestamp": 10, "willRetry": true})
        );

        let status = SyncStatus::BadResponse {
            timestamp: 3,
            status: 500,
            status_text: "Internal Server Error".into(),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"tag": "BadResponse", "timestamp": 3, "status": 500, "statusText": "Internal Server Error"})
        );
    }

    #[test]
    fn defaults_to_not_asked() {
        let metadata: SyncMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(metadata.status, SyncStatus::NotAsked);
        assert_eq!(metadata.remaining, 0);
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(SyncStatus::NetworkError {
            message: String::new(),
            timestamp: 0,
            will_retry: true
        }
        .is_retryable());
        assert!(!SyncStatus::BadJson { timestamp: 0 }.is_retryable());
        assert!(!SyncStatus::DatabaseError {
            message: String::new(),
            timestamp: 0
        }
        .is_retryable());
        assert!(!SyncStatus::Success { timestamp: 0 }.is_error());
    }

    #[test]
    fn unfinished_work_follows_the_persisted_status() {
        let with = |status, remaining| SyncMetadata {
            status,
            remaining,
            ..SyncMetadata::default()
        };
        let network = |will_retry| SyncStatus::NetworkError {
            message: "offline".into(),
            timestamp: 1,
            will_retry,
        };

        assert!(with(network(true), 0).has_unfinished_work());
        assert!(!with(network(false), 0).has_unfinished_work());
        assert!(with(SyncStatus::Loading { revision: 4, timestamp: 1 }, 0).has_unfinished_work());
        assert!(with(SyncStatus::Success { timestamp: 1 }, 70).has_unfinished_work());
        assert!(!with(SyncStatus::Success { timestamp: 1 }, 0).has_unfinished_work());
        assert!(!with(SyncStatus::BadJson { timestamp: 1 }, 5).has_unfinished_work());
        assert!(!SyncMetadata::default().has_unfinished_work());
    }
}
