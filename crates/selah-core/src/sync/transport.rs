//! Sync transport
//!
//! Executes queued changes against the remote sync API and classifies
//! every response into success, retryable failure, or fatal failure.
//! Fatal means the server will never accept the request as-is, so
//! retrying it would loop forever; retryable covers connection loss,
//! timeouts, and 5xx responses.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::db::queue::SyncQueueItem;
use crate::error::Error;
use crate::sync::protocol::{PullResponse, PushRequest, PushResponse};

/// Classified result of pushing one queued change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server applied the change; drop the queue item
    Success,
    /// Transient failure; leave the item queued and bump its retry count
    Retryable(String),
    /// The server rejected the request permanently; park the item
    Fatal(String),
    /// The bearer credential was refused; abort the cycle and ask the
    /// credential owner to re-authenticate
    Unauthorized,
}

/// Pull-side failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("sync endpoint rejected credentials")]
    Unauthorized,
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected pull request: {0}")]
    Rejected(String),
}

/// Executes sync calls against a remote endpoint
///
/// Abstracted so the orchestrator can be driven by a test double; the
/// production implementation is [`HttpSyncTransport`].
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    /// Push a single queued change (as a batch of one)
    async fn push_item(&self, item: &SyncQueueItem) -> SendOutcome;

    /// Fetch the authoritative delta since the checkpoint
    async fn pull(&self, since: Option<DateTime<Utc>>) -> Result<PullResponse, TransportError>;
}

/// HTTP implementation of the sync transport
#[derive(Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    bearer_token: String,
    client: reqwest::Client,
}

impl HttpSyncTransport {
    /// Create a transport for the given API base URL and bearer credential
    ///
    /// The credential is opaque to this layer; it is attached to every
    /// request and never inspected.
    pub fn new(
        base_url: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> crate::Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::InvalidInput(error.to_string()))?;
        Ok(Self {
            base_url,
            bearer_token: bearer_token.into(),
            client,
        })
    }

    async fn post_push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        let response = self
            .client
            .post(format!("{}/v1/sync/push", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(request)
            .send()
            .await
            .map_err(|error| TransportError::Network(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(TransportError::Network(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(parse_api_error(status, &body)));
        }

        response
            .json::<PushResponse>()
            .await
            .map_err(|error| TransportError::Rejected(error.to_string()))
    }
}

impl SyncTransport for HttpSyncTransport {
    async fn push_item(&self, item: &SyncQueueItem) -> SendOutcome {
        // A payload the wire types cannot represent will never succeed.
        let request = match PushRequest::for_item(item) {
            Ok(request) => request,
            Err(error) => return SendOutcome::Fatal(error.to_string()),
        };

        match self.post_push(&request).await {
            Ok(_) => SendOutcome::Success,
            Err(TransportError::Unauthorized) => SendOutcome::Unauthorized,
            Err(TransportError::Network(reason)) => SendOutcome::Retryable(reason),
            Err(TransportError::Rejected(reason)) => SendOutcome::Fatal(reason),
        }
    }

    async fn pull(&self, since: Option<DateTime<Utc>>) -> Result<PullResponse, TransportError> {
        let mut request = self
            .client
            .get(format!("{}/v1/sync/pull", self.base_url))
            .bearer_auth(&self.bearer_token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request
            .send()
            .await
            .map_err(|error| TransportError::Network(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(TransportError::Network(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(parse_api_error(status, &body)));
        }

        response
            .json::<PullResponse>()
            .await
            .map_err(|error| TransportError::Rejected(error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> crate::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(
            "sync endpoint must not be empty".to_string(),
        ));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "sync endpoint must include http:// or https://".to_string(),
        ))
    }
}
