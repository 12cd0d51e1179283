// External market-intelligence provider.
//
// One trait seam so the batch pipeline and tests never talk HTTP directly;
// the production implementation is the Perplexity chat-completions client.

pub mod parser;
pub mod rate_limiter;

pub use parser::parse_summary;
pub use rate_limiter::RateLimiter;

use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::models::{MarketSummary, TimeWindow};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait IntelligenceProvider: Send + Sync {
    async fn fetch(
        &self,
        commodity: &str,
        window: TimeWindow,
    ) -> Result<MarketSummary, ProviderError>;
}

/// Exponential backoff with jitter for retryable provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles each attempt
    /// with up to 25% jitter so parallel workers do not retry in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as u64 * 2u64.pow(attempt.saturating_sub(1));
        let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
        Duration::from_millis(base + jitter)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct PerplexityClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
}

impl PerplexityClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::new(config.max_attempts, config.retry_delay_ms),
            // One limiter per client; batch workers share the client, so
            // they share the budget.
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_per_second,
                config.rate_limit_per_minute,
            )),
        })
    }

    fn build_prompt(commodity: &str, window: TimeWindow) -> String {
        format!(
            "Analyze the {} market over the last {}. Respond with ONLY a \
             JSON object, no prose before or after, in exactly this shape:\n\
             {{\n\
             \"current_price\": \"USD <amount>/<unit>\",\n\
             \"price_change\": \"<+/-x.x>%\",\n\
             \"trend\": \"bullish|bearish|stable\",\n\
             \"key_drivers\": [\"<driver>\", ...],\n\
             \"market_news\": [\n\
               {{\"date\": \"<Mon DD>\", \"headline\": \"<one line>\", \
             \"details\": \"<two sentences>\", \
             \"category\": \"supply|demand|policy|logistics|macro\", \
             \"price_impact\": \"bullish|bearish|neutral\", \
             \"sources\": [\"<url>\"]}}\n\
             ],\n\
             \"price_outlook\": \"<short-term outlook>\",\n\
             \"source_urls\": [\"<url>\", ...]\n\
             }}\n\
             Include 3 to 6 market_news items, most recent first. Use real, \
             current price levels with units.",
            commodity,
            window.as_str()
        )
    }

    /// Reqwest reports its own deadline as a generic error; label it with
    /// the configured timeout so the message says how long we waited.
    fn classify(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            ProviderError::Http(err)
        }
    }

    async fn request(&self, commodity: &str, window: TimeWindow) -> Result<String, ProviderError> {
        self.rate_limiter.acquire(self.timeout).await?;

        let payload = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a commodity market analyst. You respond \
                                only with valid JSON matching the requested schema."
                },
                {
                    "role": "user",
                    "content": Self::build_prompt(commodity, window)
                }
            ],
            "temperature": 0.2,
            "max_tokens": 4000
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| self.classify(e))?;
        chat.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse {
                detail: "response carried no choices".to_string(),
            })
    }
}

#[async_trait]
impl IntelligenceProvider for PerplexityClient {
    async fn fetch(
        &self,
        commodity: &str,
        window: TimeWindow,
    ) -> Result<MarketSummary, ProviderError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.request(commodity, window).await {
                Ok(content) => return parse_summary(commodity, &content),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "Provider attempt {}/{} for {} failed ({}), retrying in {:?}",
                        attempt,
                        self.retry.max_attempts,
                        commodity,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_rejected_at_construction() {
        let config = ProviderConfig {
            api_key: "  ".to_string(),
            ..ProviderConfig::default()
        };
        assert!(matches!(
            PerplexityClient::new(&config),
            Err(ProviderError::MissingApiKey)
        ));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, 1000);
        let first = policy.delay_for(1).as_millis();
        let second = policy.delay_for(2).as_millis();
        let third = policy.delay_for(3).as_millis();
        // Jitter adds at most 25% on top of the base.
        assert!((1000..=1251).contains(&first));
        assert!((2000..=2501).contains(&second));
        assert!((4000..=5001).contains(&third));
    }

    #[test]
    fn timeout_error_reports_configured_wait() {
        let config = ProviderConfig {
            api_key: "test-key".to_string(),
            ..ProviderConfig::default()
        };
        let client = PerplexityClient::new(&config).unwrap();
        assert_eq!(client.timeout.as_secs(), config.timeout_secs);
        let err = ProviderError::Timeout {
            seconds: client.timeout.as_secs(),
        };
        assert!(err.to_string().contains("after 30s"));
    }

    #[test]
    fn prompt_names_commodity_and_window() {
        let prompt = PerplexityClient::build_prompt("iron_ore", TimeWindow::Month);
        assert!(prompt.contains("iron_ore"));
        assert!(prompt.contains("1 month"));
        assert!(prompt.contains("market_news"));
    }
}
