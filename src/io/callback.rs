use async_trait::async_trait;
use std::time::Duration;

use crate::types::{AnalysisError, AnalysisResult, CallbackPayload};

/// Delivery attempts before the job is declared lost
pub const MAX_ATTEMPTS: u32 = 3;

/// First backoff delay; doubles after every failed attempt
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Per-call timeout for callback requests
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues bearer identity tokens for service-to-service calls.
///
/// Tokens are fetched fresh per call and scoped to the target URL's audience.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `Ok(None)` means the call goes out unauthenticated (local/dev mode).
    async fn token(&self, audience: &str) -> AnalysisResult<Option<String>>;
}

/// No-op token provider for local development
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn token(&self, _audience: &str) -> AnalysisResult<Option<String>> {
        Ok(None)
    }
}

/// Transport seam for callback delivery, mockable in tests
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// POST the payload and return the HTTP status code.
    async fn post(
        &self,
        url: &str,
        bearer: Option<&str>,
        payload: &CallbackPayload,
    ) -> AnalysisResult<u16>;
}

/// reqwest-backed transport with a conservative per-call timeout
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> AnalysisResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        bearer: Option<&str>,
        payload: &CallbackPayload,
    ) -> AnalysisResult<u16> {
        let mut request = self.client.post(url).json(payload);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}

/// Delivers the result bundle to the backend's callback endpoint.
///
/// Delivery must succeed-or-exhaust: up to `MAX_ATTEMPTS` attempts with
/// exponential backoff on transport errors and non-2xx responses. Retries
/// resend the same bundle, so duplicate delivery is idempotent from the
/// backend's point of view.
pub struct CallbackClient<T, A> {
    transport: T,
    auth: A,
    backend_api_url: String,
}

impl<T: CallbackTransport, A: TokenProvider> CallbackClient<T, A> {
    pub fn new(transport: T, auth: A, backend_api_url: &str) -> Self {
        Self {
            transport,
            auth,
            backend_api_url: backend_api_url.trim_end_matches('/').to_string(),
        }
    }

    fn callback_url(&self) -> String {
        format!("{}/callbacks/analysis-complete", self.backend_api_url)
    }

    /// Send the payload, retrying with backoff until success or exhaustion.
    ///
    /// Exhaustion returns `CallbackDeliveryExhausted`; the caller logs it and
    /// carries on, the job being surfaced through external monitoring.
    pub async fn send(&self, payload: &CallbackPayload) -> AnalysisResult<()> {
        let url = self.callback_url();
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = match self.auth.token(&self.backend_api_url).await {
                Ok(token) => self.transport.post(&url, token.as_deref(), payload).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(status) if (200..300).contains(&status) => {
                    log::info!(
                        "Callback for result {} delivered on attempt {} (status {})",
                        payload.result_id,
                        attempt,
                        status
                    );
                    return Ok(());
                }
                Ok(status) => {
                    log::warn!(
                        "Callback attempt {}/{} for result {} got status {}",
                        attempt,
                        MAX_ATTEMPTS,
                        payload.result_id,
                        status
                    );
                }
                Err(e) => {
                    log::warn!(
                        "Callback attempt {}/{} for result {} failed: {}",
                        attempt,
                        MAX_ATTEMPTS,
                        payload.result_id,
                        e
                    );
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(AnalysisError::CallbackDeliveryExhausted {
            result_id: payload.result_id.clone(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_url_strips_trailing_slash() {
        let client = CallbackClient::new(DummyTransport, NoAuth, "http://backend:8000/");
        assert_eq!(
            client.callback_url(),
            "http://backend:8000/callbacks/analysis-complete"
        );
    }

    struct DummyTransport;

    #[async_trait]
    impl CallbackTransport for DummyTransport {
        async fn post(
            &self,
            _url: &str,
            _bearer: Option<&str>,
            _payload: &CallbackPayload,
        ) -> AnalysisResult<u16> {
            Ok(200)
        }
    }
}
