//! Bounded retry around a single model call.
//!
//! Retryable failures ([`ModelError::is_retryable`]) are repeated up to
//! `max_retries` times with exponential backoff and jitter. A backend
//! `Retry-After` hint wins when it is longer than the computed delay.
//! Cancellation interrupts the wait and surfaces as [`ModelError::Cancelled`].

use std::time::Duration;

use ponder_core::retry::RetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{LanguageModel, ModelError, ModelResult};

/// Model retries total (counter, labels: category).
pub const MODEL_RETRIES_TOTAL: &str = "model_retries_total";

/// Call `model.generate(prompt)`, retrying transient failures.
pub async fn generate_with_retry(
    model: &dyn LanguageModel,
    prompt: &str,
    config: &RetryConfig,
    cancel: Option<&CancellationToken>,
) -> ModelResult<String> {
    let mut attempt = 0u32;
    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ModelError::Cancelled);
        }

        let call = model.generate(prompt);
        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    result = call => result,
                    () = token.cancelled() => return Err(ModelError::Cancelled),
                }
            }
            None => call.await,
        };
        let err = match result {
            Ok(text) => return Ok(text),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= config.max_retries {
            warn!(
                model = model.model_id(),
                attempts = attempt + 1,
                category = err.category(),
                error = %err,
                "model call failed"
            );
            return Err(err);
        }

        let backoff_ms = config.delay_for(attempt, rand::random::<f64>());
        let delay_ms = err
            .retry_after_ms()
            .map_or(backoff_ms, |hint| backoff_ms.max(hint));
        attempt += 1;

        metrics::counter!(MODEL_RETRIES_TOTAL, "category" => err.category()).increment(1);
        debug!(
            model = model.model_id(),
            attempt,
            max_retries = config.max_retries,
            delay_ms,
            error = %err,
            "retrying model call"
        );

        let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
        match cancel {
            Some(token) => {
                tokio::select! {
                    () = sleep => {}
                    () = token.cancelled() => return Err(ModelError::Cancelled),
                }
            }
            None => sleep.await,
        }
    }
}
