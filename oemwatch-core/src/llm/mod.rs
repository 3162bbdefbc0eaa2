//! LLM selector-repair oracle (`spec.md` §4.4, §6). Treated as a
//! request/response collaborator with a cost model: bounded concurrency,
//! a deadline, and a circuit breaker that short-circuits a misbehaving
//! endpoint instead of hammering it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("request timed out")]
    Timeout,
    #[error("circuit open, short-circuiting")]
    CircuitOpen,
    #[error("handler unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorRepairRequest {
    pub semantic: String,
    pub old_selector: String,
    pub dom: String,
    pub url: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorRepairResponse {
    pub selector: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn repair_selector(
        &self,
        request: SelectorRepairRequest,
    ) -> Result<SelectorRepairResponse, LlmError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub window_size: usize,
    pub failure_threshold: f64,
    pub open_for: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            failure_threshold: 0.10,
            open_for: Duration::from_secs(300),
        }
    }
}

struct CircuitBreaker {
    config: CircuitBreakerConfig,
    outcomes: VecDeque<bool>,
    state: CircuitState,
    open_until: Option<Instant>,
}

enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

enum CircuitDecision {
    Proceed,
    ShortCircuit,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            outcomes: VecDeque::with_capacity(config.window_size),
            state: CircuitState::Closed,
            open_until: None,
        }
    }

    fn before_call(&mut self, now: Instant) -> CircuitDecision {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => CircuitDecision::Proceed,
            CircuitState::Open => {
                if let Some(until) = self.open_until {
                    if now >= until {
                        self.state = CircuitState::HalfOpen;
                        CircuitDecision::Proceed
                    } else {
                        CircuitDecision::ShortCircuit
                    }
                } else {
                    CircuitDecision::Proceed
                }
            }
        }
    }

    fn record(&mut self, now: Instant, success: bool) {
        match self.state {
            CircuitState::HalfOpen => {
                if success {
                    self.state = CircuitState::Closed;
                    self.outcomes.clear();
                } else {
                    self.trip(now);
                }
            }
            CircuitState::Closed => {
                self.push_outcome(success);
                if self.should_trip() {
                    self.trip(now);
                }
            }
            CircuitState::Open => {
                if success {
                    self.state = CircuitState::HalfOpen;
                } else {
                    self.trip(now);
                }
            }
        }
    }

    fn push_outcome(&mut self, success: bool) {
        if self.outcomes.len() == self.config.window_size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn should_trip(&self) -> bool {
        if self.outcomes.is_empty() {
            return false;
        }
        let failures = self.outcomes.iter().filter(|outcome| !**outcome).count();
        let rate = failures as f64 / self.outcomes.len() as f64;
        rate > self.config.failure_threshold
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.open_until = Some(now + self.config.open_for);
    }
}

/// Default `LlmClient` backed by an HTTP endpoint, wrapped in a circuit
/// breaker and a request deadline (`repairTimeoutMs`, default 30s).
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    deadline: Duration,
    breaker: tokio::sync::Mutex<CircuitBreaker>,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, deadline_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            deadline: Duration::from_millis(deadline_ms),
            breaker: tokio::sync::Mutex::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        }
    }

    async fn call(&self, request: &SelectorRepairRequest) -> Result<SelectorRepairResponse, LlmError> {
        let mut builder = self.client.post(&self.endpoint).json(&serde_json::json!({
            "semantic": request.semantic,
            "old_selector": request.old_selector,
            "dom": request.dom,
            "url": request.url,
            "tenant_id": request.tenant_id,
            "temperature": 0.1,
            "max_tokens": 200,
        }));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        Ok(response.json::<SelectorRepairResponse>().await?)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn repair_selector(
        &self,
        request: SelectorRepairRequest,
    ) -> Result<SelectorRepairResponse, LlmError> {
        let now = Instant::now();
        {
            let mut breaker = self.breaker.lock().await;
            if matches!(breaker.before_call(now), CircuitDecision::ShortCircuit) {
                return Err(LlmError::CircuitOpen);
            }
        }

        let outcome = timeout(self.deadline, self.call(&request)).await;
        let mut breaker = self.breaker.lock().await;
        match outcome {
            Ok(Ok(response)) => {
                breaker.record(now, true);
                Ok(response)
            }
            Ok(Err(err)) => {
                warn!(target: "llm", tenant_id = %request.tenant_id, "selector repair error: {err}");
                breaker.record(now, false);
                Err(err)
            }
            Err(_) => {
                warn!(target: "llm", tenant_id = %request.tenant_id, "selector repair timed out");
                breaker.record(now, false);
                Err(LlmError::Timeout)
            }
        }
    }
}

/// Fixed-response mock used by unit and integration tests in place of a
/// real LLM endpoint.
pub struct StaticLlmClient {
    pub selector: String,
}

#[async_trait]
impl LlmClient for StaticLlmClient {
    async fn repair_selector(
        &self,
        _request: SelectorRepairRequest,
    ) -> Result<SelectorRepairResponse, LlmError> {
        Ok(SelectorRepairResponse {
            selector: self.selector.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_breaker_short_circuits_after_threshold() {
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let now = Instant::now();
        for _ in 0..60 {
            breaker.record(now, false);
        }
        assert!(matches!(breaker.before_call(now), CircuitDecision::ShortCircuit));
    }

    #[tokio::test]
    async fn static_client_always_succeeds() {
        let client = StaticLlmClient {
            selector: ".new-price".into(),
        };
        let request = SelectorRepairRequest {
            semantic: "price".into(),
            old_selector: ".old-price".into(),
            dom: "<html></html>".into(),
            url: "https://x".into(),
            tenant_id: "bmw".into(),
        };
        let response = client.repair_selector(request).await.unwrap();
        assert_eq!(response.selector, ".new-price");
    }
}
