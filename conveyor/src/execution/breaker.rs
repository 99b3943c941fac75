//! Per-item circuit breaker.
//!
//! Wraps one parcel's transform call with panic recovery, bounded retries and
//! backoff. Nothing escapes this boundary: every fault ends up either retried,
//! reported to the error handler, or (when the breaker is disabled) swallowed.

use crate::core::{Outcome, Parcel, Payload};
use crate::errors::{panic_message, FailureDetail, ProcessError};
use crate::stages::Stage;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::Level;

/// A fault captured from one transform call.
enum Fault {
    Error(ProcessError),
    Panic(String),
}

impl Fault {
    const fn is_retryable(&self) -> bool {
        match self {
            Self::Error(err) => err.is_recoverable(),
            Self::Panic(_) => true,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Error(err) => err.to_string(),
            Self::Panic(message) => format!("panic: {message}"),
        }
    }

    fn into_detail(self, stage: &str, sequence: u64, attempts: u32) -> FailureDetail {
        match self {
            Self::Error(err) => FailureDetail::from_error(stage, sequence, &err, attempts),
            Self::Panic(message) => FailureDetail::from_panic(stage, sequence, message, attempts),
        }
    }
}

/// Stateless retry wrapper around a stage's transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreaker;

impl CircuitBreaker {
    /// Runs the stage's transform on `parcel` under the stage's breaker.
    ///
    /// - `Skip` and every other successful outcome are returned as-is.
    /// - With the breaker disabled, a failed call yields a null value and is
    ///   neither retried nor reported.
    /// - Recoverable errors and panics are retried with backoff while
    ///   retries remain; fatal errors are not retried.
    /// - Once retries are exhausted the error handler is invoked exactly once
    ///   and `Failure` is returned.
    pub async fn execute(stage: &Stage, parcel: &Parcel) -> Outcome {
        let config = stage.breaker();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let fault = match AssertUnwindSafe(stage.call(parcel)).catch_unwind().await {
                Ok(Ok(outcome)) => return outcome,
                Ok(Err(err)) => Fault::Error(err),
                Err(payload) => Fault::Panic(panic_message(payload.as_ref())),
            };

            if !config.enabled {
                return Outcome::Value(Payload::Null);
            }

            if fault.is_retryable() && attempts <= config.number_of_retries {
                let delay = config.delay_for(attempts);
                stage.logger().enqueue(
                    Level::DEBUG,
                    stage.name(),
                    parcel.sequence(),
                    format!(
                        "attempt {attempts} failed ({}), retrying in {}ms",
                        fault.describe(),
                        delay.as_millis()
                    ),
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let detail = fault.into_detail(stage.name(), parcel.sequence(), attempts);
            stage.error_handler().handle(stage, parcel, &detail);
            return Outcome::Failure;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Cache, Content};
    use crate::errors::FailureKind;
    use crate::pipeline::{BackoffPolicy, BreakerConfig, Options};
    use crate::stages::StageSpec;
    use crate::testing::RecordingErrorHandler;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn parcel() -> Parcel {
        Parcel::new(Content::Value(json!(1)), 3, Cache::new())
    }

    fn breaker(retries: u32) -> BreakerConfig {
        BreakerConfig::new()
            .with_retries(retries)
            .with_policy(BackoffPolicy::Static)
            .with_interval_ms(1)
    }

    #[tokio::test]
    async fn test_success_calls_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let stage = StageSpec::new("ok")
            .with_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Outcome::value("done"))
            })
            .tidy(&Options::default());

        let outcome = CircuitBreaker::execute(&stage, &parcel()).await;
        assert_eq!(outcome, Outcome::value("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(RecordingErrorHandler::new());
        let c = calls.clone();
        let stage = StageSpec::new("flaky")
            .with_breaker(breaker(3))
            .with_error_handler(handler.clone())
            .with_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ProcessError::recoverable("nope"))
            })
            .tidy(&Options::default());

        let outcome = CircuitBreaker::execute(&stage, &parcel()).await;

        assert_eq!(outcome, Outcome::Failure);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(handler.call_count(), 1);

        let failure = &handler.failures()[0];
        assert_eq!(failure.attempts, 4);
        assert_eq!(failure.sequence, 3);
        assert_eq!(failure.kind, FailureKind::Recoverable);
    }

    #[tokio::test]
    async fn test_panics_are_caught_and_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(RecordingErrorHandler::new());
        let c = calls.clone();
        let stage = StageSpec::new("panicky")
            .with_breaker(breaker(2))
            .with_error_handler(handler.clone())
            .with_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                panic!("test");
            })
            .tidy(&Options::default());

        let outcome = CircuitBreaker::execute(&stage, &parcel()).await;

        assert_eq!(outcome, Outcome::Failure);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let failure = &handler.failures()[0];
        assert_eq!(failure.kind, FailureKind::Panic);
        assert_eq!(failure.message, "test");
    }

    #[tokio::test]
    async fn test_fatal_error_skips_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(RecordingErrorHandler::new());
        let c = calls.clone();
        let stage = StageSpec::new("fatal")
            .with_breaker(breaker(5))
            .with_error_handler(handler.clone())
            .with_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ProcessError::fatal("corrupt input"))
            })
            .tidy(&Options::default());

        let outcome = CircuitBreaker::execute(&stage, &parcel()).await;

        assert_eq!(outcome, Outcome::Failure);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_breaker_swallows_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(RecordingErrorHandler::new());
        let c = calls.clone();
        let stage = StageSpec::new("best-effort")
            .with_breaker(BreakerConfig::disabled().with_retries(5))
            .with_error_handler(handler.clone())
            .with_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ProcessError::recoverable("ignored"))
            })
            .tidy(&Options::default());

        let outcome = CircuitBreaker::execute(&stage, &parcel()).await;

        assert_eq!(outcome, Outcome::Value(Payload::Null));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_skip_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(RecordingErrorHandler::new());
        let c = calls.clone();
        let stage = StageSpec::new("skipper")
            .with_breaker(breaker(3))
            .with_error_handler(handler.clone())
            .with_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Outcome::Skip)
            })
            .tidy(&Options::default());

        let outcome = CircuitBreaker::execute(&stage, &parcel()).await;

        assert_eq!(outcome, Outcome::Skip);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let stage = StageSpec::new("eventually")
            .with_breaker(breaker(3))
            .with_fn(move |p| {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProcessError::recoverable("not yet"))
                } else {
                    Ok(Outcome::Value(p.value().cloned().unwrap_or_default()))
                }
            })
            .tidy(&Options::default());

        let outcome = CircuitBreaker::execute(&stage, &parcel()).await;
        assert_eq!(outcome, Outcome::value(1));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
