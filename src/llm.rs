//! LLM Client
//!
//! OpenAI-compatible chat-completions client plus the bounded
//! exponential-backoff retry policy wrapped around every generation call.
//! The request issuer is a trait so the retry and extraction layers can be
//! exercised with stub backends instead of a live endpoint.

use crate::error::{PilotError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Injectable completion issuer. `Err(PilotError::Unavailable)` is the only
/// failure the retry policy will retry on.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Bounded exponential backoff for generation calls.
///
/// Attempt `n` (0-based) that fails with the transient-overload signature
/// sleeps `base_delay * 2^n` before the next try. Any other failure
/// propagates immediately. The sleep suspends the task (never busy-spins)
/// and is abandoned with the task on cancellation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff delay for a 0-based attempt index.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }

    pub async fn call_with_retry<T, F, Fut>(&self, mut make_request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            match make_request().await {
                Ok(response) => return Ok(response),
                Err(PilotError::Unavailable(msg)) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM unavailable, backing off"
                    );
                    last_error = msg;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(PilotError::Overloaded {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            http: reqwest::Client::new(),
        }
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "Return JSON only, no text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
        });

        debug!(model = %self.model, "calling LLM");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            // 503 / UNAVAILABLE is the transient-overload signature the
            // retry policy acts on; everything else fails fast.
            if status.as_u16() == 503 || error_text.contains("UNAVAILABLE") {
                return Err(PilotError::Unavailable(format!(
                    "LLM API error ({}): {}",
                    status, error_text
                )));
            }
            return Err(PilotError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PilotError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(PilotError::Llm(format!("LLM API error: {}", error)));
        }

        let choices = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PilotError::Llm("No choices in LLM response".to_string()))?;

        if let Some("content_filter") = choices[0].get("finish_reason").and_then(|r| r.as_str()) {
            return Err(PilotError::Llm(
                "LLM response was filtered by content policy".to_string(),
            ));
        }

        let content = choices[0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PilotError::Llm("No content in LLM response".to_string()))?;

        if content.is_empty() {
            return Err(PilotError::Llm("Empty content in LLM response".to_string()));
        }

        Ok(content.to_string())
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.call_llm(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(2))
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(3000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(6000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(12000));
    }

    #[tokio::test]
    async fn returns_immediately_on_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(5)
            .call_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, PilotError>("ok".to_string()) }
            })
            .await
            .unwrap();
        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result = fast_policy(5)
            .call_with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 4 {
                        Err(PilotError::Unavailable("503 overloaded".to_string()))
                    } else {
                        Ok("recovered".to_string())
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // four backoff sleeps: 2 + 4 + 8 + 16 ms
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(5)
            .call_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(PilotError::Llm("401 unauthorized".to_string())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Llm(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(3)
            .call_with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(PilotError::Unavailable("UNAVAILABLE".to_string())) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            PilotError::Overloaded {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "UNAVAILABLE");
            }
            other => panic!("expected Overloaded, got {other}"),
        }
    }
}
