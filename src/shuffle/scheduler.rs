//! Background shuffling loops
//!
//! Each loop is a tokio task driven by `tokio::time::interval` that stops
//! when the scheduler's broadcast shutdown fires. All reassignments go
//! through [`AddressMappingTable::assign`], which re-checks the live table,
//! so loops for different tiers never need to coordinate with each other.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::policy::{clamp_interval, ShufflePolicy};
use super::pool::AddressPool;
use super::stats::ShuffleStats;
use crate::error::{MappingError, MtdError, PoolError};
use crate::mapping::{AddressMappingTable, PriorityTier};

/// Default per-host retry budget
pub const DEFAULT_SHUFFLE_ATTEMPTS: usize = 8;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Timing policy
    pub policy: ShufflePolicy,
    /// Fresh draws per host before its shuffle is skipped for the cycle
    pub max_attempts: usize,
}

impl SchedulerConfig {
    /// Create a configuration with the default retry budget
    #[must_use]
    pub fn new(policy: ShufflePolicy) -> Self {
        Self {
            policy,
            max_attempts: DEFAULT_SHUFFLE_ATTEMPTS,
        }
    }

    /// Set the per-host retry budget
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Periodically reassigns virtual addresses
#[derive(Debug)]
pub struct ShufflingScheduler {
    table: Arc<AddressMappingTable>,
    pool: Arc<AddressPool>,
    config: SchedulerConfig,
    stats: ShuffleStats,
    shutdown_tx: broadcast::Sender<()>,
    active: AtomicBool,
}

impl ShufflingScheduler {
    /// Create a scheduler over a table and pool
    #[must_use]
    pub fn new(
        table: Arc<AddressMappingTable>,
        pool: Arc<AddressPool>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            table,
            pool,
            config,
            stats: ShuffleStats::new(),
            shutdown_tx,
            active: AtomicBool::new(false),
        }
    }

    /// Start the background loops for the configured policy
    pub fn spawn(self: &Arc<Self>) -> SchedulerHandle {
        self.active.store(true, Ordering::SeqCst);
        let mut handles = Vec::new();

        match &self.config.policy {
            ShufflePolicy::Uniform { interval } => {
                let interval = clamp_interval(*interval);
                info!(interval = ?interval, "Starting uniform shuffling");
                let shutdown_rx = self.shutdown_tx.subscribe();
                handles.push(tokio::spawn(Arc::clone(self).run_uniform(interval, shutdown_rx)));
            }
            ShufflePolicy::Priority {
                base_interval,
                weights,
            } => {
                let snapshot = self.table.snapshot();
                let mut tiers: BTreeSet<PriorityTier> =
                    snapshot.records().map(|record| record.priority()).collect();
                tiers.extend(weights.iter().map(|(tier, _)| tier));

                for tier in tiers {
                    if !weights.is_configured(tier) {
                        warn!(tier, "No weight configured for tier, using base interval");
                    }
                    let interval = weights.interval_for(*base_interval, tier);
                    info!(tier, interval = ?interval, "Starting tier shuffling");
                    let shutdown_rx = self.shutdown_tx.subscribe();
                    handles.push(tokio::spawn(Arc::clone(self).run_tier(
                        tier,
                        interval,
                        shutdown_rx,
                    )));
                }
            }
        }

        SchedulerHandle { handles }
    }

    /// Signal every loop to stop
    pub fn shutdown(&self) {
        info!("Shutting down shuffling scheduler");
        self.active.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Check if the loops are running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &ShuffleStats {
        &self.stats
    }

    /// Scheduler configuration
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The table this scheduler writes to
    #[must_use]
    pub fn table(&self) -> &Arc<AddressMappingTable> {
        &self.table
    }

    /// Move every host in one batch of pairwise distinct addresses.
    ///
    /// Returns the number of hosts that moved.
    pub fn shuffle_all(&self) -> usize {
        self.stats.rounds.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.table.snapshot();
        let mut reals: Vec<Ipv4Addr> = snapshot.records().map(|r| r.real_address()).collect();
        reals.sort_unstable();

        let batch = match self
            .pool
            .allocate_distinct(reals.len(), &snapshot.occupied_addresses())
        {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Batch allocation failed, shuffling hosts individually");
                return reals
                    .into_iter()
                    .filter(|real| self.shuffle_host_logged(*real))
                    .count();
            }
        };

        let mut moved = 0;
        for (real, virtual_address) in reals.into_iter().zip(batch) {
            match self.table.assign(real, virtual_address) {
                Ok(previous) => {
                    self.stats.shuffles.fetch_add(1, Ordering::Relaxed);
                    info!(real = %real, from = %previous, to = %virtual_address, "Host shuffled");
                    moved += 1;
                }
                Err(e) if e.is_collision() => {
                    // The table moved since the batch was drawn
                    self.stats.collisions.fetch_add(1, Ordering::Relaxed);
                    if self.shuffle_host_logged(real) {
                        moved += 1;
                    }
                }
                Err(e) => warn!(real = %real, error = %e, "Host shuffle failed"),
            }
        }
        moved
    }

    /// Move every host of `tier` that has not moved within the last half
    /// `interval`. Each host gets an independent draw.
    ///
    /// The tier timer sets the cadence; the age check only skips hosts that
    /// moved recently by other means, so a tick handled late never pushes a
    /// host to the following tick.
    ///
    /// Returns the number of hosts that moved.
    pub fn shuffle_tier(&self, tier: PriorityTier, interval: Duration) -> usize {
        let now = Instant::now();
        let due_age = interval / 2;
        let snapshot = self.table.snapshot();
        let mut due: Vec<Ipv4Addr> = snapshot
            .records()
            .filter(|record| record.priority() == tier)
            .filter(|record| record.age(now) >= due_age)
            .map(|record| record.real_address())
            .collect();
        if due.is_empty() {
            return 0;
        }
        due.sort_unstable();
        self.stats.rounds.fetch_add(1, Ordering::Relaxed);
        debug!(tier, hosts = due.len(), "Tier due for shuffling");

        due.into_iter()
            .filter(|real| self.shuffle_host_logged(*real))
            .count()
    }

    /// Give one host a fresh virtual address, retrying collisions and
    /// exhaustion with new draws against the live table.
    ///
    /// # Errors
    /// Returns the last error once the retry budget is spent, or
    /// immediately for an unknown host.
    pub fn shuffle_host(&self, real: Ipv4Addr) -> Result<Ipv4Addr, MtdError> {
        let mut last_error: MtdError = PoolError::Exhausted {
            range: self.pool.network(),
            requested: 1,
            available: 0,
        }
        .into();

        for attempt in 1..=self.config.max_attempts {
            let snapshot = self.table.snapshot();
            let candidate = match self.pool.allocate(&snapshot.occupied_addresses()) {
                Ok(candidate) => candidate,
                Err(e) => {
                    self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                    debug!(real = %real, attempt, error = %e, "Draw failed");
                    last_error = e.into();
                    continue;
                }
            };

            match self.table.assign(real, candidate) {
                Ok(previous) => {
                    self.stats.shuffles.fetch_add(1, Ordering::Relaxed);
                    info!(real = %real, from = %previous, to = %candidate, "Host shuffled");
                    return Ok(candidate);
                }
                Err(e @ MappingError::UnknownHost { .. }) => return Err(e.into()),
                Err(e) => {
                    self.stats.collisions.fetch_add(1, Ordering::Relaxed);
                    debug!(real = %real, attempt, error = %e, "Assignment collided");
                    last_error = e.into();
                }
            }
        }

        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
        Err(last_error)
    }

    /// `shuffle_host` with failures logged; the host keeps its address
    fn shuffle_host_logged(&self, real: Ipv4Addr) -> bool {
        match self.shuffle_host(real) {
            Ok(_) => true,
            Err(e) => {
                warn!(real = %real, error = %e, "Skipping host shuffle this cycle");
                false
            }
        }
    }

    async fn run_uniform(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let moved = self.shuffle_all();
                    debug!(moved, "Uniform shuffle round complete");
                }
                _ = shutdown_rx.recv() => {
                    info!("Uniform shuffling stopped");
                    return;
                }
            }
        }
    }

    async fn run_tier(
        self: Arc<Self>,
        tier: PriorityTier,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let moved = self.shuffle_tier(tier, interval);
                    debug!(tier, moved, "Tier shuffle round complete");
                }
                _ = shutdown_rx.recv() => {
                    info!(tier, "Tier shuffling stopped");
                    return;
                }
            }
        }
    }
}

/// Join handles of the running loops
#[derive(Debug)]
pub struct SchedulerHandle {
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of running loops
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if no loops were started
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every loop to exit
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Shuffle loop ended abnormally");
            }
        }
    }
}
