//! # Request and Response Context
//!
//! Read-only snapshots of the request being served and the response being
//! produced, attached to every forwarded record for attribution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the inbound request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// HTTP method
    pub method: String,
    /// Request URL as received (path and query)
    pub url: String,
    /// Request headers, names lower-cased
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RequestContext {
    /// Creates a context for the given method and URL
    pub fn new<M, U>(method: M, url: U) -> Self
    where
        M: Into<String>,
        U: Into<String>,
    {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Adds a header to the context
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header by case-insensitive name
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Path component of the URL, without the query
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    /// Headers whose names do not start with any of the given prefixes
    pub fn filtered_headers(&self, exclude_prefixes: &[String]) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter(|(name, _)| {
                !exclude_prefixes
                    .iter()
                    .any(|prefix| name.starts_with(&prefix.to_ascii_lowercase()))
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Reference to the outgoing response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseContext {
    /// Status the caller will receive
    pub status_code: u16,
}

/// Parameters attached to a captured exception
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    /// Unique id of the captured record
    pub record_id: Uuid,
    /// When the failure was captured
    pub captured_at: DateTime<Utc>,
    /// Header-name prefixes the collector should leave out
    pub exclude_header_prefixes: Vec<String>,
}

impl CaptureParams {
    pub fn new(exclude_header_prefixes: Vec<String>) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            captured_at: Utc::now(),
            exclude_header_prefixes,
        }
    }
}
