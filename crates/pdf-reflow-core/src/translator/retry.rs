use std::time::Duration;

use tracing::{debug, warn};

use super::Translator;
use crate::config::{Lang, TranslatorConfig};
use crate::error::{Error, Result};

/// Bounded retry with exponential backoff and a per-attempt deadline
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline for a single attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn from_config(config: &TranslatorConfig) -> Self {
        Self {
            max_attempts: config.retry_count,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Delay after the failed attempt number `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TranslatorConfig::default())
    }
}

/// Translate `text`, retrying transient failures.
///
/// Non-retryable errors are returned as-is after the first attempt.
/// Exhausting the attempts yields `TranslationMaxRetriesExceeded`.
pub async fn translate_with_retry(
    translator: &dyn Translator,
    text: &str,
    source: &Lang,
    target: &Lang,
    policy: &RetryPolicy,
) -> Result<String> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        let result = tokio::time::timeout(policy.timeout, translator.translate(text, source, target))
            .await
            .unwrap_or_else(|_| Err(Error::TranslationTimeout(policy.timeout)));

        let err = match result {
            Ok(translated) => return Ok(translated),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt + 1 < attempts {
            let mut delay = policy.backoff(attempt);
            if let Error::TranslationRateLimited {
                retry_after: Some(secs),
            } = &err
            {
                delay = delay.max(Duration::from_secs(*secs));
            }
            debug!(
                "Attempt {}/{} failed ({}), retrying in {:?}",
                attempt + 1,
                attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
        last_error = Some(err);
    }

    let last = last_error.map_or_else(String::new, |e| e.to_string());
    warn!("Translation failed after {} attempts: {}", attempts, last);
    Err(Error::TranslationMaxRetriesExceeded { attempts, last })
}
