use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use shared::types::{StatusSnapshot, Target};
use crate::config::PollerConfig;
use crate::probe::Prober;
use crate::store_manager::StoreHandle;

/// Result of one poll cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Targets present when the cycle started
    pub targets: usize,
    pub online: usize,
    pub offline: usize,
    /// Targets whose snapshot could not be written
    pub failed: usize,
}

/// Periodic status poller.
///
/// Every tick takes the current target list, probes all targets at once and
/// records one snapshot per target. Ticks can also be driven by hand.
pub struct Poller<P: Prober> {
    store: StoreHandle,
    prober: Arc<P>,
    interval: Duration,
    skip_if_busy: bool,
    in_flight: Arc<AtomicUsize>,
    cycles: TaskTracker,
}

impl<P: Prober> Clone for Poller<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            prober: self.prober.clone(),
            interval: self.interval,
            skip_if_busy: self.skip_if_busy,
            in_flight: self.in_flight.clone(),
            cycles: self.cycles.clone(),
        }
    }
}

/// Counts one running cycle; the count drops even if the cycle panics
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Running poller; dropping it leaves the loop running until the token is cancelled
pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop ticking and wait for in-flight cycles to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!("Poller task failed: {}", e);
        }
    }
}

impl<P: Prober> Poller<P> {
    pub fn new(store: StoreHandle, prober: P, config: &PollerConfig) -> Self {
        Self {
            store,
            prober: Arc::new(prober),
            interval: config.interval(),
            skip_if_busy: config.skip_if_busy,
            in_flight: Arc::new(AtomicUsize::new(0)),
            cycles: TaskTracker::new(),
        }
    }

    /// Spawn the tick loop. The first cycle starts immediately.
    pub fn start(self, cancel: CancellationToken) -> PollerHandle {
        let loop_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(loop_cancel).await });
        PollerHandle { cancel, join }
    }

    async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            "Starting status poller (interval: {:?}, skip_if_busy: {})",
            self.interval,
            self.skip_if_busy
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Status poller shutting down");
                    break;
                }
            }
        }

        self.settle().await;
    }

    /// Start a cycle in the background. Returns false if the tick was skipped
    /// because an earlier cycle is still running.
    pub fn tick(&self) -> bool {
        if self.skip_if_busy && self.in_flight.load(Ordering::SeqCst) > 0 {
            tracing::warn!("Previous poll cycle still running, skipping tick");
            return false;
        }

        let guard = InFlightGuard::enter(&self.in_flight);
        let poller = self.clone();
        self.cycles.spawn(async move {
            let _guard = guard;
            match poller.run_cycle().await {
                Ok(summary) => tracing::info!(
                    "Poll cycle complete: {} targets, {} online, {} offline, {} failed",
                    summary.targets,
                    summary.online,
                    summary.offline,
                    summary.failed
                ),
                Err(e) => tracing::error!("Poll cycle aborted: {:#}", e),
            }
        });
        true
    }

    /// Wait until every cycle started so far has finished
    pub async fn settle(&self) {
        self.cycles.close();
        self.cycles.wait().await;
        self.cycles.reopen();
    }

    /// Probe every current target concurrently and record one snapshot each.
    /// Fails only if the target list itself cannot be read.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let targets = self.store.list().await.context("Failed to list targets")?;
        tracing::debug!("Polling {} targets", targets.len());

        let mut summary = CycleSummary {
            targets: targets.len(),
            ..CycleSummary::default()
        };

        let mut probes: FuturesUnordered<_> = targets
            .into_iter()
            .map(|target| {
                let store = self.store.clone();
                let prober = self.prober.clone();
                tokio::spawn(async move { poll_target(&store, prober.as_ref(), target).await })
            })
            .collect();

        while let Some(joined) = probes.next().await {
            match joined {
                Ok(Ok(snapshot)) if snapshot.online => summary.online += 1,
                Ok(Ok(_)) => summary.offline += 1,
                Ok(Err(e)) => {
                    tracing::error!("{:#}", e);
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!("Probe task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

async fn poll_target<P: Prober>(store: &StoreHandle, prober: &P, target: Target) -> Result<StatusSnapshot> {
    let outcome = prober.probe(target.poll_address(), target.target_port).await;

    if outcome.is_online() {
        tracing::debug!("{} ({}) is online", target.name, target.dns_record);
    } else {
        tracing::debug!("{} ({}) is offline", target.name, target.dns_record);
    }

    store
        .record_status(target.id, outcome)
        .await
        .with_context(|| format!("Failed to record status for {}", target.id))
}
