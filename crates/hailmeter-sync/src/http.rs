//! # HTTP Completion API
//!
//! [`CompletionApi`] over HTTPS with reqwest.
//!
//! ```text
//! POST {base}/bookings/{bookingId}/complete   CompleteTripRequest  → 2xx
//! POST {base}/bookings/flagdown               FlagdownRequest      → FlagdownCreated
//!
//! Authorization: Bearer <token>
//! Idempotency-Key: <idempotencyKey>
//! ```

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::api::{ApiError, CompleteTripRequest, CompletionApi, FlagdownCreated, FlagdownRequest};
use crate::config::BackendSettings;
use crate::error::{SyncError, SyncResult};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpCompletionApi {
    client: Client,
    base_url: Url,
}

impl HttpCompletionApi {
    /// Creates a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, request_timeout: Duration) -> SyncResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(HttpCompletionApi { client, base_url })
    }

    /// Creates a client from the `[backend]` config section.
    pub fn from_settings(settings: &BackendSettings) -> SyncResult<Self> {
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("backend.base_url is not set".into()))?;
        Self::new(base_url, Duration::from_secs(settings.request_timeout_secs))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("bad endpoint {path}: {e}")))
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        token: &str,
        idempotency_key: &str,
        body: &T,
    ) -> Result<Response, ApiError> {
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        classify(response).await
    }
}

/// Passes 2xx through; turns anything else into a classified [`ApiError`].
async fn classify(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    let error = ApiError::from_status(status.as_u16(), body);
    warn!(status = status.as_u16(), rejected = error.is_rejection(), "Backend returned an error");
    Err(error)
}

#[async_trait]
impl CompletionApi for HttpCompletionApi {
    async fn complete_booking(
        &self,
        token: &str,
        request: &CompleteTripRequest,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("bookings/{}/complete", request.booking_id))?;
        self.post(url, token, &request.idempotency_key, request)
            .await?;
        Ok(())
    }

    async fn create_flagdown(
        &self,
        token: &str,
        request: &FlagdownRequest,
    ) -> Result<FlagdownCreated, ApiError> {
        let url = self.endpoint("bookings/flagdown")?;
        let response = self
            .post(url, token, &request.idempotency_key, request)
            .await?;

        // A 2xx we cannot read may still have created the booking; retrying
        // with the same idempotency key is the safe answer.
        response
            .json::<FlagdownCreated>()
            .await
            .map_err(|e| ApiError::Transport(format!("unreadable flagdown response: {e}")))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
