//! Device credentials model

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Backend location and the short-lived token pair used to reach it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub backend_url: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl Credentials {
    /// Build credentials, trimming values and rejecting empty or non-HTTP input.
    pub fn new(
        backend_url: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self> {
        let backend_url = normalize_text_option(Some(backend_url.into()))
            .ok_or_else(|| Error::InvalidInput("backend_url must not be empty".into()))?;
        if !is_http_url(&backend_url) {
            return Err(Error::InvalidInput(
                "backend_url must include http:// or https://".into(),
            ));
        }
        let access_token = normalize_text_option(Some(access_token.into()))
            .ok_or_else(|| Error::InvalidInput("access_token must not be empty".into()))?;
        let refresh_token = normalize_text_option(Some(refresh_token.into()))
            .ok_or_else(|| Error::InvalidInput("refresh_token must not be empty".into()))?;

        Ok(Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            access_token,
            refresh_token,
        })
    }

    /// Same backend, new token pair.
    #[must_use]
    pub fn with_tokens(&self, access_token: String, refresh_token: String) -> Self {
        Self {
            backend_url: self.backend_url.clone(),
            access_token,
            refresh_token,
        }
    }

    /// Backend URL without a trailing slash.
    pub fn backend_base(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("backend_url", &self.backend_url)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}
