//! Destinations for submitted records.
//!
//! Every submission is written to the primary sink, a hosted table store.
//! Quote requests are then also posted to a relay that forwards them by
//! email. Both are traits so the dispatcher can be exercised without network
//! access; the HTTP implementations live behind the `web` feature.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[cfg(feature = "web")]
impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Transport(e.to_string())
    }
}

/// Hosted data store accepting row inserts into named tables
#[async_trait]
pub trait PrimarySink: Send + Sync {
    /// Insert `rows` into `table`. Either all rows are stored or an error is returned.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), SinkError>;
}

/// Third-party endpoint forwarding a submission, e.g. as a notification email
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn relay(&self, payload: Value) -> Result<(), SinkError>;
}

#[cfg(feature = "web")]
pub use self::http::{FormRelay, RestTableSink};

#[cfg(feature = "web")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Client, Response, header::CONTENT_TYPE};
    use serde_json::Value;
    use tracing::debug;

    use super::{PrimarySink, RelaySink, SinkError};

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn client() -> Result<Client, SinkError> {
        Ok(Client::builder()
            .timeout(TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()?)
    }

    async fn ensure_success(response: Response) -> Result<(), SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// Table inserts over a PostgREST-style API (`POST {base}/rest/v1/{table}`)
    pub struct RestTableSink {
        client: Client,
        base_url: String,
        api_key: String,
    }

    impl RestTableSink {
        /// Create a sink for the project at `base_url`.
        ///
        /// # Arguments
        /// * `base_url` - Project URL; a trailing slash is ignored
        /// * `api_key` - Sent both as `apikey` and as the bearer token
        ///
        /// # Errors
        /// * Returns an error if the HTTP client cannot be built
        pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SinkError> {
            Ok(Self {
                client: client()?,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key: api_key.into(),
            })
        }
    }

    #[async_trait]
    impl PrimarySink for RestTableSink {
        async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), SinkError> {
            let url = format!("{}/rest/v1/{}", self.base_url, table);
            debug!(%url, rows = rows.len(), "Inserting rows");

            let response = self
                .client
                .post(&url)
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key)
                .header("Prefer", "return=minimal")
                .json(&rows)
                .send()
                .await?;

            ensure_success(response).await
        }
    }

    /// JSON form relay (`POST {url}`)
    pub struct FormRelay {
        client: Client,
        url: String,
    }

    impl FormRelay {
        /// Create a relay posting to `url`.
        pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
            Ok(Self {
                client: client()?,
                url: url.into(),
            })
        }
    }

    #[async_trait]
    impl RelaySink for FormRelay {
        async fn relay(&self, payload: Value) -> Result<(), SinkError> {
            debug!(url = %self.url, "Relaying submission");

            let response = self
                .client
                .post(&self.url)
                .header(CONTENT_TYPE, "application/json")
                .header("Accept", "application/json")
                .body(payload.to_string())
                .send()
                .await?;

            ensure_success(response).await
        }
    }
}
