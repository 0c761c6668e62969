//! HTTP client module for flushing batches to the remote endpoint.
//!
//! A flush is a single JSON POST. There is no retry: the batch has already
//! been drained from the buffer, so a failed POST loses it and only the
//! failure is logged.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::FlushBatch;
use crate::config::Config;

/// Errors that can occur while flushing a batch.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    Request(reqwest::Error),

    /// Payload could not be encoded as JSON
    Serialize(String),

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Serialize(e) => write!(f, "Failed to serialize payload: {}", e),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Request(err)
    }
}

/// Boxed future returned by [`Transport::post_json`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<StatusCode, ClientError>> + Send + 'a>>;

/// Outbound HTTP seam.
///
/// Resolves with whatever status the server answered; interpreting it is
/// left to the caller.
pub trait Transport: Send + Sync {
    /// POST `body` to `url` as `application/json`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Request` only when no response was received.
    fn post_json<'a>(&'a self, url: &'a str, body: String) -> TransportFuture<'a>;
}

/// [`Transport`] backed by a pooled reqwest client.
///
/// No request timeout is set: a POST waits until the server answers or the
/// connection fails.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build the transport with connection pooling and no request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ClientError> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self::with_client(client))
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, url: &str, body: String) -> Result<StatusCode, ClientError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await?;

        Ok(response.status())
    }
}

impl Transport for HttpTransport {
    fn post_json<'a>(&'a self, url: &'a str, body: String) -> TransportFuture<'a> {
        Box::pin(self.send(url, body))
    }
}

/// Statistics about flush operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Batches that got any HTTP response
    pub batches_sent: u64,

    /// Batches lost to a transport or encoding failure
    pub batches_failed: u64,

    /// Readings contained in sent batches
    pub readings_sent: u64,

    /// Status of the most recent response
    pub last_status: Option<StatusCode>,
}

/// Sends drained batches to the configured endpoint.
///
/// Each batch gets exactly one POST. The response status is logged and
/// counted; transport failures are logged and the batch is dropped.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use device_collector::client::{Flusher, HttpTransport};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let transport = Arc::new(HttpTransport::new().expect("Failed to create client"));
///     let flusher = Arc::new(Flusher::new(transport, "https://kovalsky.pl"));
///
///     // Batches normally come from the buffer's flush handler:
///     // buffer = SampleBuffer::new(trigger, move |batch| { flusher.dispatch(batch); });
///     println!("flushing to {}", flusher.endpoint());
/// }
/// ```
pub struct Flusher {
    transport: Arc<dyn Transport>,
    endpoint: String,
    stats: RwLock<FlushStats>,
}

impl Flusher {
    /// Create a flusher.
    ///
    /// # Arguments
    ///
    /// * `transport` - Performs the POST
    /// * `endpoint` - Absolute URL every batch is sent to
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            stats: RwLock::new(FlushStats::default()),
        }
    }

    /// Flusher pointed at the configured endpoint.
    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self::new(transport, config.endpoint_url.clone())
    }

    /// POST one batch as `{"data": ...}` and report the response status.
    ///
    /// The status is observed, not validated: any response counts as sent.
    ///
    /// # Arguments
    ///
    /// * `batch` - The drained readings to send
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Serialize` if the payload cannot be encoded and
    /// `ClientError::Request` if no response arrived. Neither is retried.
    pub async fn flush(&self, batch: FlushBatch) -> Result<StatusCode, ClientError> {
        let body = match serde_json::to_string(&batch.payload()) {
            Ok(body) => body,
            Err(e) => {
                let err = ClientError::Serialize(e.to_string());
                warn!(
                    batch_id = %batch.batch_id,
                    created_at = %batch.created_at,
                    error = %err,
                    "Flush failed, batch dropped"
                );
                self.record_failure();
                return Err(err);
            }
        };

        debug!(
            batch_id = %batch.batch_id,
            batch_size = batch.reading_count,
            content_length = body.len(),
            url = %self.endpoint,
            "Sending batch"
        );

        match self.transport.post_json(&self.endpoint, body).await {
            Ok(status) => {
                info!(
                    batch_id = %batch.batch_id,
                    batch_size = batch.reading_count,
                    age_ms = batch.age_ms(),
                    status = %status,
                    "Flush response status"
                );
                if let Ok(mut stats) = self.stats.write() {
                    stats.batches_sent += 1;
                    stats.readings_sent += batch.reading_count as u64;
                    stats.last_status = Some(status);
                }
                Ok(status)
            }
            Err(e) => {
                warn!(
                    batch_id = %batch.batch_id,
                    batch_size = batch.reading_count,
                    created_at = %batch.created_at,
                    age_ms = batch.age_ms(),
                    error = %e,
                    "Flush failed, batch dropped"
                );
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Run [`Flusher::flush`] on a detached task.
    ///
    /// Used from the buffer's synchronous flush handler, so the append that
    /// crossed the threshold never waits on the network. The returned handle
    /// may be dropped; the POST still completes.
    pub fn dispatch(self: &Arc<Self>, batch: FlushBatch) -> JoinHandle<()> {
        let flusher = Arc::clone(self);
        tokio::spawn(async move {
            let _ = flusher.flush(batch).await;
        })
    }

    fn record_failure(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.batches_failed += 1;
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stats(&self) -> FlushStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}
