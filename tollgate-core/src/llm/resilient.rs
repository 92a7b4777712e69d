//! Retry and circuit-breaker wrapper for model providers

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{ModelInfo, ModelProvider, ModelRequest, ModelResponse, ModelStream};
use crate::error::{Result, TollgateError};
use crate::gate::{CircuitBreaker, RetryPolicy};

/// Provider that retries transient failures and trips a shared breaker.
///
/// Whatever escapes the retry policy is reported as a provider error.
pub struct ResilientProvider {
    inner: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientProvider {
    pub fn new(
        inner: Arc<dyn ModelProvider>,
        policy: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            inner,
            policy,
            breaker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl ModelProvider for ResilientProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.policy
            .run(Some(&self.breaker), move || self.inner.complete(request))
            .await
            .map_err(TollgateError::into_provider)
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream> {
        self.policy
            .run(Some(&self.breaker), move || self.inner.stream(request))
            .await
            .map_err(TollgateError::into_provider)
    }

    async fn structured_output(&self, request: &ModelRequest, schema: &Value) -> Result<Value> {
        self.policy
            .run(Some(&self.breaker), move || {
                self.inner.structured_output(request, schema)
            })
            .await
            .map_err(TollgateError::into_provider)
    }

    fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{CircuitBreakerConfig, CircuitState};
    use crate::llm::ScriptedProvider;

    fn resilient(inner: ScriptedProvider, threshold: usize) -> (Arc<ScriptedProvider>, ResilientProvider) {
        let inner = Arc::new(inner);
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default().with_failure_threshold(threshold),
        ));
        let provider = ResilientProvider::new(inner.clone(), RetryPolicy::default(), breaker);
        (inner, provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let (inner, provider) = resilient(
            ScriptedProvider::new()
                .with_error(TollgateError::Http {
                    status: 429,
                    message: "slow down".into(),
                })
                .with_text("done"),
            3,
        );

        let response = provider
            .complete(&ModelRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.text, "done");
        assert_eq!(inner.call_count(), 2);
        assert_eq!(provider.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_become_provider_error() {
        let (inner, provider) = resilient(
            ScriptedProvider::new()
                .with_error(TollgateError::Transport("reset".into()))
                .with_error(TollgateError::Transport("reset".into()))
                .with_error(TollgateError::Transport("reset".into())),
            1,
        );

        let err = provider
            .complete(&ModelRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::Provider(ref m) if m.contains("reset")));
        assert_eq!(inner.call_count(), 3);
        assert_eq!(provider.breaker().state(), CircuitState::Open);

        let err = provider
            .complete(&ModelRequest::from_prompt("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::Provider(ref m) if m.contains("open")));
        assert_eq!(inner.call_count(), 3);
    }
}
