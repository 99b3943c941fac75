//! Stage transforms and specifications.
//!
//! A stage is a user-supplied transform plus the knobs that control how the
//! pipeline runs it: concurrency, queue capacity, lifecycle hooks and
//! per-stage overrides of the pipeline's breaker, logger and error handler.

mod spec;

pub use spec::{
    Hook, Stage, StageSpec, DEFAULT_BUFFER_SIZE, DEFAULT_SCALE, MAX_BUFFER_SIZE, MAX_SCALE,
};

use crate::core::{Outcome, Parcel};
use crate::errors::ProcessError;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Result of one transform call.
pub type ProcessResult = Result<Outcome, ProcessError>;

/// Trait for stage transforms.
///
/// A transform receives one parcel and decides what flows downstream. It may
/// be called concurrently for different parcels when the stage's `max_scale`
/// is above one, and repeatedly for the same parcel when the circuit breaker
/// retries.
#[async_trait]
pub trait Process: Send + Sync {
    /// Processes one parcel.
    async fn process(&self, parcel: &Parcel) -> ProcessResult;
}

/// Forwards the parcel's content unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProcess;

#[async_trait]
impl Process for IdentityProcess {
    async fn process(&self, parcel: &Parcel) -> ProcessResult {
        Ok(match parcel.content() {
            crate::core::Content::Value(v) => Outcome::Value(v.clone()),
            crate::core::Content::Skip => Outcome::Skip,
            crate::core::Content::Failure => Outcome::Failure,
        })
    }
}

/// A synchronous closure transform.
pub struct FnProcess<F>
where
    F: Fn(&Parcel) -> ProcessResult + Send + Sync,
{
    func: F,
}

impl<F> FnProcess<F>
where
    F: Fn(&Parcel) -> ProcessResult + Send + Sync,
{
    /// Creates a new closure transform.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Process for FnProcess<F>
where
    F: Fn(&Parcel) -> ProcessResult + Send + Sync,
{
    async fn process(&self, parcel: &Parcel) -> ProcessResult {
        (self.func)(parcel)
    }
}

/// An async closure transform. The closure receives an owned parcel.
pub struct AsyncFnProcess<F, Fut>
where
    F: Fn(Parcel) -> Fut + Send + Sync,
    Fut: Future<Output = ProcessResult> + Send,
{
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnProcess<F, Fut>
where
    F: Fn(Parcel) -> Fut + Send + Sync,
    Fut: Future<Output = ProcessResult> + Send,
{
    /// Creates a new async closure transform.
    pub const fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Process for AsyncFnProcess<F, Fut>
where
    F: Fn(Parcel) -> Fut + Send + Sync,
    Fut: Future<Output = ProcessResult> + Send,
{
    async fn process(&self, parcel: &Parcel) -> ProcessResult {
        (self.func)(parcel.clone()).await
    }
}
