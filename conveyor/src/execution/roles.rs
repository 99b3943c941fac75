//! The three stage roles: source, segment and sink.
//!
//! Each stage runs as one role task. Segments and sinks additionally spawn a
//! bounded pool of item workers; a full pool stops the role from reading its
//! inbound queue, which is what propagates backpressure upstream.

use super::breaker::CircuitBreaker;
use super::flush::FlushMessage;
use crate::cancellation::CancellationToken;
use crate::core::{Cache, Content, Outcome, Parcel};
use crate::stages::Stage;
use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, Level};

/// Shared state handed to every role of one run.
#[derive(Debug, Clone)]
pub(crate) struct RoleContext {
    pub(crate) cache: Cache,
    flush: UnboundedSender<FlushMessage>,
    /// Sink deliveries one parcel at this position turns into.
    multiplier: i64,
}

impl RoleContext {
    pub(crate) fn new(cache: Cache, flush: UnboundedSender<FlushMessage>, multiplier: i64) -> Self {
        Self {
            cache,
            flush,
            multiplier,
        }
    }

    fn expanded(&self, sequence: u64, width: usize) {
        let width = i64::try_from(width).unwrap_or(i64::MAX);
        let delta = (width - 1).saturating_mul(self.multiplier);
        if delta != 0 {
            // The controller only goes away once every role has finished.
            let _ = self.flush.send(FlushMessage::Expand { sequence, delta });
        }
    }

    fn completed(&self, sequence: u64) {
        let _ = self.flush.send(FlushMessage::Complete { sequence });
    }
}

/// Generates parcels until the transform returns `Stop`, the token fires, or
/// nothing downstream is listening any more.
pub(crate) async fn run_source(
    stage: Arc<Stage>,
    ctx: RoleContext,
    outbound: Sender<Parcel>,
    token: CancellationToken,
) {
    stage.init(&ctx.cache);
    stage.logger().info(stage.name(), "Source started");

    let mut parcel = Parcel::new(Content::default(), 0, ctx.cache.clone());
    loop {
        if token.is_cancelled() {
            stage.logger().info(
                stage.name(),
                &format!(
                    "Cancelled before parcel {}: {}",
                    parcel.sequence(),
                    token.reason().unwrap_or_default()
                ),
            );
            break;
        }

        let bound = parcel.clone().bind(stage.name(), stage.logger());
        let outcome = CircuitBreaker::execute(&stage, &bound).await;
        if outcome.is_stop() {
            stage
                .logger()
                .debug(stage.name(), &format!("Stopped after {} parcel(s)", parcel.sequence()));
            break;
        }
        if !forward(&stage, &ctx, &bound, outcome, &outbound).await {
            break;
        }
        parcel = parcel.generate();
    }

    stage.dispose(&ctx.cache);
    stage.logger().info(
        stage.name(),
        &format!("Source finished after {} parcel(s)", parcel.sequence()),
    );
}

/// Transforms every inbound parcel with up to `max_scale` calls in flight.
pub(crate) async fn run_segment(
    stage: Arc<Stage>,
    ctx: RoleContext,
    mut inbound: Receiver<Parcel>,
    outbound: Sender<Parcel>,
) {
    stage.init(&ctx.cache);
    stage.logger().info(stage.name(), "Segment started");

    let slots = Arc::new(Semaphore::new(stage.max_scale()));
    let mut workers = JoinSet::new();

    while let Some(parcel) = inbound.recv().await {
        if parcel.content().is_sentinel() {
            note_sentinel(&stage, &parcel, "forwarded");
            if outbound.send(parcel).await.is_err() {
                break;
            }
            continue;
        }

        let Ok(slot) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let (worker, ctx, outbound) = (Arc::clone(&stage), ctx.clone(), outbound.clone());
        workers.spawn(async move {
            let parcel = parcel.bind(worker.name(), worker.logger());
            let outcome = CircuitBreaker::execute(&worker, &parcel).await;
            forward(&worker, &ctx, &parcel, outcome, &outbound).await;
            drop(slot);
        });

        while let Some(joined) = workers.try_join_next() {
            report_join(&stage, joined);
        }
    }

    while let Some(joined) = workers.join_next().await {
        report_join(&stage, joined);
    }
    stage.dispose(&ctx.cache);
    stage.logger().info(stage.name(), "Segment drained, quitting");
}

/// Consumes every inbound parcel and reports one completion per parcel.
///
/// The run's flush input closes once the last role holding a context has
/// finished, which the sink's context drop contributes to.
pub(crate) async fn run_sink(stage: Arc<Stage>, ctx: RoleContext, mut inbound: Receiver<Parcel>) {
    stage.init(&ctx.cache);
    stage.logger().info(stage.name(), "Sink started");

    let slots = Arc::new(Semaphore::new(stage.max_scale()));
    let mut workers = JoinSet::new();

    while let Some(parcel) = inbound.recv().await {
        if parcel.content().is_sentinel() {
            note_sentinel(&stage, &parcel, "absorbed");
            ctx.completed(parcel.sequence());
            continue;
        }

        let Ok(slot) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let (worker, ctx) = (Arc::clone(&stage), ctx.clone());
        workers.spawn(async move {
            let parcel = parcel.bind(worker.name(), worker.logger());
            let outcome = CircuitBreaker::execute(&worker, &parcel).await;
            if outcome.is_stop() {
                worker
                    .logger()
                    .warn(worker.name(), "Stop is only meaningful from a source, ignoring");
            }
            ctx.completed(parcel.sequence());
            drop(slot);
        });

        while let Some(joined) = workers.try_join_next() {
            report_join(&stage, joined);
        }
    }

    while let Some(joined) = workers.join_next().await {
        report_join(&stage, joined);
    }
    stage.dispose(&ctx.cache);
    stage.logger().info(stage.name(), "Sink drained, quitting");
}

/// Sends a transform's outcome downstream. Returns false once the outbound
/// queue has closed.
async fn forward(
    stage: &Stage,
    ctx: &RoleContext,
    parcel: &Parcel,
    outcome: Outcome,
    outbound: &Sender<Parcel>,
) -> bool {
    let content = match outcome {
        Outcome::Value(value) => Content::Value(value),
        Outcome::Skip => Content::Skip,
        Outcome::Failure => Content::Failure,
        Outcome::Stop => {
            stage.logger().warn(
                stage.name(),
                &format!(
                    "Stop is only meaningful from a source, forwarding parcel {} as Skip",
                    parcel.sequence()
                ),
            );
            Content::Skip
        }
        Outcome::Expand(items) => {
            ctx.expanded(parcel.sequence(), items.len());
            for item in items {
                if outbound.send(parcel.pack(Content::Value(item))).await.is_err() {
                    return false;
                }
            }
            return true;
        }
    };

    let packed = parcel.pack(content);
    if packed.content().is_sentinel() {
        note_sentinel(stage, &packed, "produced");
    }
    outbound.send(packed).await.is_ok()
}

fn note_sentinel(stage: &Stage, parcel: &Parcel, verb: &str) {
    stage.logger().enqueue(
        Level::DEBUG,
        stage.name(),
        parcel.sequence(),
        format!("{} {}", verb, parcel.content().tag()),
    );
}

fn report_join(stage: &Stage, joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(stage = %stage.name(), error = %err, "Item worker terminated abnormally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProcessError;
    use crate::execution::connector::connect;
    use crate::observability::Logger;
    use crate::pipeline::Options;
    use crate::stages::StageSpec;
    use crate::testing::CollectingLogger;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn context() -> (RoleContext, mpsc::UnboundedReceiver<FlushMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RoleContext::new(Cache::new(), tx, 1), rx)
    }

    fn counting_source(limit: u64) -> Arc<Stage> {
        Arc::new(
            StageSpec::new("source")
                .with_fn(move |p| {
                    if p.sequence() < limit {
                        Ok(Outcome::value(p.sequence()))
                    } else {
                        Ok(Outcome::Stop)
                    }
                })
                .tidy(&Options::default()),
        )
    }

    async fn drain(mut rx: Receiver<Parcel>) -> Vec<Parcel> {
        let mut out = Vec::new();
        while let Some(p) = rx.recv().await {
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn test_source_emits_until_stop() {
        let (ctx, _flush) = context();
        let (tx, rx) = connect(1);
        let collected = tokio::spawn(drain(rx));

        run_source(counting_source(4), ctx, tx, CancellationToken::new()).await;

        let sequences: Vec<_> = collected.await.unwrap().iter().map(Parcel::sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_source_observes_cancellation() {
        let (ctx, _flush) = context();
        let (tx, rx) = connect(1);
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let collected = tokio::spawn(drain(rx));
        run_source(counting_source(100), ctx, tx, token).await;

        assert!(collected.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_expansion_shares_sequence() {
        let (ctx, mut flush) = context();
        let (tx, rx) = connect(8);
        let stage = Arc::new(
            StageSpec::new("split")
                .with_fn(|p| {
                    if p.sequence() == 0 {
                        Ok(Outcome::expand(["a", "b", "c"]))
                    } else {
                        Ok(Outcome::Stop)
                    }
                })
                .tidy(&Options::default()),
        );

        run_source(stage, ctx, tx, CancellationToken::new()).await;

        let parcels = drain(rx).await;
        assert_eq!(parcels.len(), 3);
        assert!(parcels.iter().all(|p| p.sequence() == 0));
        assert_eq!(
            flush.recv().await,
            Some(FlushMessage::Expand { sequence: 0, delta: 2 })
        );
    }

    #[tokio::test]
    async fn test_segment_forwards_sentinels_without_calling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let stage = Arc::new(
            StageSpec::new("double")
                .with_fn(move |p| {
                    c.fetch_add(1, Ordering::SeqCst);
                    let n = p.value().and_then(serde_json::Value::as_i64).unwrap_or(0);
                    Ok(Outcome::value(n * 2))
                })
                .tidy(&Options::default()),
        );
        let (ctx, _flush) = context();
        let (in_tx, in_rx) = connect(4);
        let (out_tx, out_rx) = connect(4);
        let cache = ctx.cache.clone();

        in_tx.send(Parcel::new(Content::Value(json!(21)), 0, cache.clone())).await.unwrap();
        in_tx.send(Parcel::new(Content::Skip, 1, cache.clone())).await.unwrap();
        in_tx.send(Parcel::new(Content::Failure, 2, cache)).await.unwrap();
        drop(in_tx);

        run_segment(stage, ctx, in_rx, out_tx).await;

        let mut parcels = drain(out_rx).await;
        parcels.sort_by_key(Parcel::sequence);
        let contents: Vec<_> = parcels.iter().map(|p| p.content().clone()).collect();
        assert_eq!(
            contents,
            vec![Content::Value(json!(42)), Content::Skip, Content::Failure]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_segment_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, pk) = (active.clone(), peak.clone());
        let stage = Arc::new(
            StageSpec::new("slow")
                .with_max_scale(2)
                .with_async(move |p| {
                    let (a, pk) = (a.clone(), pk.clone());
                    async move {
                        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                        pk.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        a.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, ProcessError>(Outcome::value(p.sequence()))
                    }
                })
                .tidy(&Options::default()),
        );
        let (ctx, _flush) = context();
        let (in_tx, in_rx) = connect(16);
        let (out_tx, out_rx) = connect(16);

        for i in 0..8 {
            in_tx.send(Parcel::new(Content::default(), i, ctx.cache.clone())).await.unwrap();
        }
        drop(in_tx);

        run_segment(stage, ctx, in_rx, out_tx).await;

        assert_eq!(drain(out_rx).await.len(), 8);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_segment_stop_becomes_skip() {
        let collector = Arc::new(CollectingLogger::new());
        let logger: Arc<dyn Logger> = collector.clone();
        let stage = Arc::new(
            StageSpec::new("confused")
                .with_logger(logger)
                .with_fn(|_| Ok(Outcome::Stop))
                .tidy(&Options::default()),
        );
        let (ctx, _flush) = context();
        let (in_tx, in_rx) = connect(1);
        let (out_tx, out_rx) = connect(1);

        in_tx.send(Parcel::new(Content::default(), 0, ctx.cache.clone())).await.unwrap();
        drop(in_tx);

        let collected = tokio::spawn(drain(out_rx));
        run_segment(stage, ctx, in_rx, out_tx).await;

        let parcels = collected.await.unwrap();
        assert_eq!(parcels[0].content(), &Content::Skip);
        assert!(collector.lines().iter().any(|l| l.level == Level::WARN));
    }

    #[tokio::test]
    async fn test_sink_completes_every_parcel() {
        let stage = Arc::new(
            StageSpec::new("sink")
                .with_fn(|p| {
                    if p.sequence() == 1 {
                        Err(ProcessError::fatal("bad row"))
                    } else {
                        Ok(Outcome::value(true))
                    }
                })
                .tidy(&Options::default()),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RoleContext::new(Cache::new(), tx, 1);
        let (in_tx, in_rx) = connect(4);

        in_tx.send(Parcel::new(Content::default(), 0, ctx.cache.clone())).await.unwrap();
        in_tx.send(Parcel::new(Content::default(), 1, ctx.cache.clone())).await.unwrap();
        in_tx.send(Parcel::new(Content::Skip, 2, ctx.cache.clone())).await.unwrap();
        drop(in_tx);

        run_sink(stage, ctx, in_rx).await;

        let mut completed = Vec::new();
        while let Some(message) = rx.recv().await {
            if let FlushMessage::Complete { sequence } = message {
                completed.push(sequence);
            }
        }
        completed.sort_unstable();
        assert_eq!(completed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_hooks_run_once_around_work() {
        let stage = Arc::new(
            StageSpec::new("hooks")
                .with_init(|cache| {
                    cache.increment("init", 1);
                })
                .with_dispose(|cache| {
                    cache.increment("dispose", 1);
                })
                .tidy(&Options::default()),
        );
        let (ctx, _flush) = context();
        let cache = ctx.cache.clone();
        let (in_tx, in_rx) = connect(1);
        drop(in_tx);

        run_sink(stage, ctx, in_rx).await;

        assert_eq!(cache.get("init"), Some(json!(1)));
        assert_eq!(cache.get("dispose"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_roles_log_start_and_finish() {
        let collector = Arc::new(CollectingLogger::new());
        let logger: Arc<dyn Logger> = collector.clone();
        let segment = Arc::new(
            StageSpec::new("segment")
                .with_logger(logger.clone())
                .tidy(&Options::default()),
        );
        let sink = Arc::new(StageSpec::new("sink").with_logger(logger).tidy(&Options::default()));
        let (ctx, _flush) = context();
        let (in_tx, in_rx) = connect(1);
        let (mid_tx, mid_rx) = connect(1);

        in_tx.send(Parcel::new(Content::default(), 0, ctx.cache.clone())).await.unwrap();
        drop(in_tx);

        let sinking = tokio::spawn(run_sink(sink, ctx.clone(), mid_rx));
        run_segment(segment, ctx, in_rx, mid_tx).await;
        sinking.await.unwrap();

        let immediate: Vec<_> = collector
            .lines()
            .into_iter()
            .filter(|l| l.sequence.is_none())
            .map(|l| (l.stage, l.message))
            .collect();
        let segment_lines: Vec<_> = immediate.iter().filter(|(s, _)| s == "segment").collect();
        let sink_lines: Vec<_> = immediate.iter().filter(|(s, _)| s == "sink").collect();
        assert_eq!(segment_lines.len(), 2);
        assert_eq!(segment_lines[0].1, "Segment started");
        assert_eq!(segment_lines[1].1, "Segment drained, quitting");
        assert_eq!(sink_lines.len(), 2);
        assert_eq!(sink_lines[0].1, "Sink started");
        assert_eq!(sink_lines[1].1, "Sink drained, quitting");
    }
}
