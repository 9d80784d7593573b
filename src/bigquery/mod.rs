pub mod models;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    config::{Config, TableRef},
    reading::SensorReading,
};

use self::models::{InsertAllRequest, InsertAllResponse, InsertError, TokenResponse};

/// Seconds before expiry at which a cached token is refreshed.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Failure of the write call itself, as opposed to rows rejected by the table.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to obtain access token: {0}")]
    Token(#[source] Box<SinkError>),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Destination for sensor rows.
///
/// `Ok` carries the per-row rejections; an empty vector means every row
/// was stored. `Err` means the call did not complete.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn insert_rows(&self, rows: &[SensorReading]) -> Result<Vec<InsertError>, SinkError>;
}

/// BigQuery streaming-insert client. Clones share the HTTP pool and token cache.
#[derive(Debug, Clone)]
pub struct BigQueryClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    table: TableRef,
    static_token: Option<String>,
    metadata_token_url: String,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    /// Unix timestamp (seconds) when this token expires
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at > now + TOKEN_REFRESH_MARGIN_SECS
    }
}

impl BigQueryClient {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                http: Client::new(),
                base_url: config.bigquery_base_url.clone(),
                table: config.table.clone(),
                static_token: config.bigquery_access_token.clone(),
                metadata_token_url: config.metadata_token_url.clone(),
                token: Mutex::new(None),
            }),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.inner.table
    }

    /// Returns a valid access token, refreshing it if necessary.
    async fn access_token(&self) -> Result<String, SinkError> {
        if let Some(token) = &self.inner.static_token {
            return Ok(token.clone());
        }

        let mut guard = self.inner.token.lock().await;
        let now = chrono::Utc::now().timestamp();

        if let Some(ref cached) = *guard {
            if cached.is_fresh(now) {
                return Ok(cached.access_token.clone());
            }
        }

        info!("Fetching new BigQuery access token");
        let token = self
            .fetch_token()
            .await
            .map_err(|e| SinkError::Token(Box::new(e)))?;
        let access_token = token.access_token.clone();

        *guard = Some(CachedToken {
            access_token: token.access_token,
            expires_at: now + token.expires_in,
        });

        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<TokenResponse, SinkError> {
        let url = self.inner.metadata_token_url.clone();
        debug!(url = %url, "Requesting access token from metadata server");

        let resp = self
            .inner
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|source| SinkError::Request {
                url: url.clone(),
                source,
            })?;

        read_json(url, resp).await
    }
}

#[async_trait]
impl RowSink for BigQueryClient {
    async fn insert_rows(&self, rows: &[SensorReading]) -> Result<Vec<InsertError>, SinkError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let token = self.access_token().await?;
        let url = format!(
            "{}{}/insertAll",
            self.inner.base_url,
            self.inner.table.resource_path()
        );
        debug!(table = %self.inner.table, rows = rows.len(), "Streaming rows to BigQuery");

        let resp = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&InsertAllRequest::new(rows))
            .send()
            .await
            .map_err(|source| SinkError::Request {
                url: url.clone(),
                source,
            })?;

        let body: InsertAllResponse = read_json(url, resp).await?;
        Ok(body.insert_errors)
    }
}

/// Reads the body of `resp`, mapping non-2xx statuses to [`SinkError::Status`].
async fn read_json<T: serde::de::DeserializeOwned>(
    url: String,
    resp: reqwest::Response,
) -> Result<T, SinkError> {
    let status = resp.status();
    let bytes = match resp.bytes().await {
        Ok(b) => b,
        Err(source) => return Err(SinkError::Request { url, source }),
    };

    if !status.is_success() {
        return Err(SinkError::Status {
            url,
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    serde_json::from_slice(&bytes).map_err(|source| SinkError::Decode { url, source })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
