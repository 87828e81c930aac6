//! Periodic mapping table monitor

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::info;

use crate::mapping::{AddressMappingTable, HostRecord};

/// One line of the mapping dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingLine {
    /// Display name or the real address
    pub host: String,
    /// Real address
    pub real: Ipv4Addr,
    /// Current virtual address
    pub virtual_address: Ipv4Addr,
    /// Priority tier
    pub priority: u8,
    /// Time since the last reassignment
    pub age: Duration,
    /// Reassignments so far
    pub shuffles: u64,
}

impl MappingLine {
    fn from_record(record: &HostRecord, now: Instant) -> Self {
        Self {
            host: record
                .name()
                .map_or_else(|| record.real_address().to_string(), str::to_string),
            real: record.real_address(),
            virtual_address: record.virtual_address(),
            priority: record.priority(),
            age: record.age(now),
            shuffles: record.shuffle_count(),
        }
    }
}

/// Current table contents sorted by real address
pub fn mapping_lines(table: &AddressMappingTable) -> Vec<MappingLine> {
    let now = Instant::now();
    table
        .snapshot_for_diagnostics()
        .iter()
        .map(|record| MappingLine::from_record(record, now))
        .collect()
}

/// Log the whole table at info level
pub fn log_mapping(table: &AddressMappingTable) {
    let stats = table.stats().snapshot();
    info!(
        hosts = table.len(),
        assignments = stats.assignments,
        collisions = stats.collisions,
        "Current address mapping"
    );
    for line in mapping_lines(table) {
        info!(
            host = %line.host,
            real = %line.real,
            virtual_address = %line.virtual_address,
            priority = line.priority,
            age_secs = line.age.as_secs(),
            shuffles = line.shuffles,
            "  mapping"
        );
    }
}

/// Start a task that logs the table every `interval` until shutdown
pub fn spawn_mapping_monitor(
    table: Arc<AddressMappingTable>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => log_mapping(&table),
                _ = shutdown_rx.recv() => {
                    info!("Mapping monitor stopped");
                    return;
                }
            }
        }
    })
}
