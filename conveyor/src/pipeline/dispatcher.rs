//! Turns a pipeline specification into running tasks.

use super::{PipelineSpec, Runner, StageGroup};
use crate::cancellation::CancellationToken;
use crate::core::{Cache, Parcel};
use crate::errors::ConfigurationError;
use crate::execution::connector::{connect, demultiplex, multiplex};
use crate::execution::roles::{run_segment, run_sink, run_source, RoleContext};
use crate::execution::FlushController;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Queues joining one group to the next.
struct Edge {
    /// One sender per upstream stage.
    outbound: Vec<Sender<Parcel>>,
    /// One receiver per downstream stage.
    inbound: Vec<Receiver<Parcel>>,
}

/// Launches runs of a built pipeline.
///
/// Every dispatch gets its own cache, queues, flush controller and run id,
/// so one dispatcher can start any number of independent runs.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    spec: Arc<PipelineSpec>,
}

impl Dispatcher {
    /// Creates a dispatcher for `spec`. The topology is checked on dispatch.
    #[must_use]
    pub fn new(spec: PipelineSpec) -> Self {
        Self {
            spec: Arc::new(spec),
        }
    }

    /// Returns the specification.
    #[must_use]
    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Starts a run that stops when `token` is cancelled or the source
    /// returns `Stop`. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the topology is invalid, most
    /// notably [`ConfigurationError::PipelineTooShort`].
    pub fn dispatch(&self, token: CancellationToken) -> Result<Runner, ConfigurationError> {
        self.spec.validate()?;

        let spec = &*self.spec;
        let groups = spec.groups();
        let multipliers = spec.multipliers();
        let run_id = Uuid::new_v4();
        let cache = Cache::new();
        let mut runner = Runner::new(spec.name(), run_id, token.clone());

        info!(
            pipeline = %spec.name(),
            run_id = %run_id,
            groups = groups.len(),
            "Dispatching pipeline"
        );

        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let controller = FlushController::new(multipliers[0], spec.loggers());
        runner.push_task(
            "flush",
            tokio::spawn(
                controller
                    .run(flush_rx)
                    .instrument(info_span!("flush", pipeline = %spec.name(), run_id = %run_id)),
            ),
        );

        let mut outbound: Vec<Vec<Sender<Parcel>>> = Vec::with_capacity(groups.len());
        let mut inbound: Vec<Vec<Receiver<Parcel>>> = Vec::with_capacity(groups.len());
        inbound.push(Vec::new());
        for (position, pair) in groups.windows(2).enumerate() {
            let edge = wire(&pair[0], &pair[1], position + 1, &mut runner);
            outbound.push(edge.outbound);
            inbound.push(edge.inbound);
        }
        outbound.push(Vec::new());

        let last = groups.len() - 1;
        let lanes = groups.iter().zip(outbound).zip(inbound).enumerate();
        for (position, ((group, senders), receivers)) in lanes {
            let ctx = RoleContext::new(cache.clone(), flush_tx.clone(), multipliers[position]);

            if position == 0 {
                for (stage, tx) in group.stages().iter().zip(senders) {
                    let span = role_span(spec.name(), run_id, stage.name(), "source");
                    let task = run_source(Arc::clone(stage), ctx.clone(), tx, token.clone());
                    runner.push_task(stage.name(), tokio::spawn(task.instrument(span)));
                }
            } else if position == last {
                for (stage, rx) in group.stages().iter().zip(receivers) {
                    let span = role_span(spec.name(), run_id, stage.name(), "sink");
                    let task = run_sink(Arc::clone(stage), ctx.clone(), rx);
                    runner.push_task(stage.name(), tokio::spawn(task.instrument(span)));
                }
            } else {
                let lanes = group.stages().iter().zip(receivers).zip(senders);
                for ((stage, rx), tx) in lanes {
                    let span = role_span(spec.name(), run_id, stage.name(), "segment");
                    let task = run_segment(Arc::clone(stage), ctx.clone(), rx, tx);
                    runner.push_task(stage.name(), tokio::spawn(task.instrument(span)));
                }
            }
        }

        // Roles hold the only remaining senders; the controller finishes with them.
        drop(flush_tx);
        Ok(runner)
    }

    /// Starts a run with a fresh token and no deadline. Cancel it through
    /// [`Runner::cancel`].
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub fn dispatch_background(&self) -> Result<Runner, ConfigurationError> {
        self.dispatch(CancellationToken::new())
    }

    /// Starts a run whose token is cancelled once `timeout` elapses.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub fn dispatch_with_timeout(&self, timeout: Duration) -> Result<Runner, ConfigurationError> {
        let token = CancellationToken::new();
        let mut runner = self.dispatch(token.clone())?;

        runner.push_timer(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel(format!("timed out after {}ms", timeout.as_millis()));
        }));

        Ok(runner)
    }
}

/// Allocates the queues between two adjacent groups, inserting a connector
/// when their widths differ.
fn wire(upstream: &StageGroup, downstream: &StageGroup, position: usize, runner: &mut Runner) -> Edge {
    match upstream.width().cmp(&downstream.width()) {
        Ordering::Equal => {
            let (outbound, inbound): (Vec<_>, Vec<_>) = downstream
                .stages()
                .iter()
                .map(|stage| connect(stage.queue_capacity()))
                .unzip();
            Edge { outbound, inbound }
        }
        Ordering::Less => {
            let (targets, inbound): (Vec<_>, Vec<_>) = downstream
                .stages()
                .iter()
                .map(|stage| connect(stage.queue_capacity()))
                .unzip();
            let (tx, rx) = connect(1);
            runner.push_task(format!("multiplex@{position}"), multiplex(rx, targets));
            Edge {
                outbound: vec![tx],
                inbound,
            }
        }
        Ordering::Greater => {
            let capacity = downstream.stages().first().map_or(1, |s| s.queue_capacity());
            let (target, rx) = connect(capacity);
            let (outbound, sources): (Vec<_>, Vec<_>) =
                (0..upstream.width()).map(|_| connect(1)).unzip();
            for handle in demultiplex(target, sources) {
                runner.push_task(format!("demultiplex@{position}"), handle);
            }
            Edge {
                outbound,
                inbound: vec![rx],
            }
        }
    }
}

fn role_span(pipeline: &str, run_id: Uuid, stage: &str, role: &'static str) -> tracing::Span {
    info_span!("stage", pipeline = %pipeline, run_id = %run_id, stage = %stage, role = role)
}
