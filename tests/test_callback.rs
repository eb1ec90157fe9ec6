use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use geowatch_analysis::io::callback::{
    CallbackClient, CallbackTransport, NoAuth, TokenProvider, MAX_ATTEMPTS,
};
use geowatch_analysis::types::{AnalysisError, AnalysisResult, CallbackPayload};

fn payload() -> CallbackPayload {
    let _ = env_logger::builder().is_test(true).try_init();
    CallbackPayload::failed("res-42", "aggregator stage failed: test".to_string())
}

#[derive(Clone)]
struct ScriptedTransport {
    outcomes: Arc<Mutex<VecDeque<AnalysisResult<u16>>>>,
    bearers: Arc<Mutex<Vec<Option<String>>>>,
}

impl ScriptedTransport {
    fn new(outcomes: Vec<AnalysisResult<u16>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            bearers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn attempts(&self) -> usize {
        self.bearers.lock().unwrap().len()
    }
}

#[async_trait]
impl CallbackTransport for ScriptedTransport {
    async fn post(
        &self,
        _url: &str,
        bearer: Option<&str>,
        _payload: &CallbackPayload,
    ) -> AnalysisResult<u16> {
        self.bearers
            .lock()
            .unwrap()
            .push(bearer.map(|b| b.to_string()));
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(200))
    }
}

/// Issues a numbered token on every call, proving tokens are fetched fresh
struct CountingTokens {
    calls: AtomicU32,
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn token(&self, audience: &str) -> AnalysisResult<Option<String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("token-{n}-for-{audience}")))
    }
}

#[tokio::test]
async fn test_first_attempt_success_sends_once() {
    let transport = ScriptedTransport::new(vec![Ok(200)]);
    let client = CallbackClient::new(transport.clone(), NoAuth, "http://backend:8000");
    client.send(&payload()).await.unwrap();
    assert_eq!(transport.attempts(), 1);
    assert_eq!(transport.bearers.lock().unwrap()[0], None);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_retried() {
    let transport = ScriptedTransport::new(vec![
        Err(AnalysisError::Platform("connection refused".to_string())),
        Ok(200),
    ]);
    let client = CallbackClient::new(transport.clone(), NoAuth, "http://backend:8000");

    let started = tokio::time::Instant::now();
    client.send(&payload()).await.unwrap();

    assert_eq!(transport.attempts(), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_after_max_attempts() {
    let transport = ScriptedTransport::new(vec![Ok(503), Ok(503), Ok(503)]);
    let client = CallbackClient::new(transport.clone(), NoAuth, "http://backend:8000");

    let err = client.send(&payload()).await.unwrap_err();
    match err {
        AnalysisError::CallbackDeliveryExhausted { result_id, attempts } => {
            assert_eq!(result_id, "res-42");
            assert_eq!(attempts, MAX_ATTEMPTS);
        }
        other => panic!("expected CallbackDeliveryExhausted, got {other}"),
    }
    assert_eq!(transport.attempts(), MAX_ATTEMPTS as usize);
}

#[tokio::test(start_paused = true)]
async fn test_token_fetched_fresh_per_attempt() {
    let transport = ScriptedTransport::new(vec![Ok(500), Ok(200)]);
    let client = CallbackClient::new(
        transport.clone(),
        CountingTokens {
            calls: AtomicU32::new(0),
        },
        "http://backend:8000",
    );

    client.send(&payload()).await.unwrap();

    let bearers = transport.bearers.lock().unwrap();
    assert_eq!(bearers.len(), 2);
    assert_eq!(
        bearers[0].as_deref(),
        Some("token-1-for-http://backend:8000")
    );
    assert_eq!(
        bearers[1].as_deref(),
        Some("token-2-for-http://backend:8000")
    );
}
