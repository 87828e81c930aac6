//! Controller application: answers switch and packet events

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::events::{PacketDisposition, PacketMetadata, PacketOut, RuleUpdate, SwitchId};
use crate::flow::{FlowRule, FlowRulePolicy, DNS_RULE_PRIORITY, VIRTUAL_RULE_PRIORITY};
use crate::mapping::AddressMappingTable;
use crate::packet::headers::{EthernetHeader, Ipv4Header, ETHERTYPE_IPV4, IPPROTO_UDP};
use crate::packet::DnsRewriter;

/// Controller statistics
#[derive(Debug, Default)]
pub struct ControllerStats {
    /// Switch connections handled
    pub switches_connected: AtomicU64,
    /// Packet-ins received
    pub packet_ins: AtomicU64,
    /// Packet-ins handled as DNS responses
    pub dns_responses: AtomicU64,
    /// Packet-ins addressed to a virtual address
    pub virtual_hits: AtomicU64,
    /// Packet-ins that matched neither path
    pub ignored: AtomicU64,
    /// Rule updates produced by the sync task
    pub rule_updates: AtomicU64,
}

impl ControllerStats {
    /// Get a snapshot of current stats
    #[must_use]
    pub fn snapshot(&self) -> ControllerStatsSnapshot {
        ControllerStatsSnapshot {
            switches_connected: self.switches_connected.load(Ordering::Relaxed),
            packet_ins: self.packet_ins.load(Ordering::Relaxed),
            dns_responses: self.dns_responses.load(Ordering::Relaxed),
            virtual_hits: self.virtual_hits.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rule_updates: self.rule_updates.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of controller statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStatsSnapshot {
    /// Switch connections
    pub switches_connected: u64,
    /// Packet-ins
    pub packet_ins: u64,
    /// DNS responses
    pub dns_responses: u64,
    /// Virtual address hits
    pub virtual_hits: u64,
    /// Ignored packet-ins
    pub ignored: u64,
    /// Rule updates
    pub rule_updates: u64,
}

/// What a packet-in turned out to be
enum PacketClass {
    DnsResponse,
    VirtualDestination(Ipv4Addr),
    Other,
}

/// Moving target defense controller
///
/// Holds the per-switch record of installed virtual-address rules so that
/// later changes to the mapping table can be applied incrementally.
#[derive(Debug)]
pub struct MtdController {
    table: Arc<AddressMappingTable>,
    policy: FlowRulePolicy,
    rewriter: DnsRewriter,
    /// Virtual addresses with an installed interception rule, per switch
    installed: DashMap<SwitchId, BTreeSet<Ipv4Addr>>,
    stats: ControllerStats,
}

impl MtdController {
    /// Create a controller
    #[must_use]
    pub fn new(
        table: Arc<AddressMappingTable>,
        policy: FlowRulePolicy,
        rewriter: DnsRewriter,
    ) -> Self {
        Self {
            table,
            policy,
            rewriter,
            installed: DashMap::new(),
            stats: ControllerStats::default(),
        }
    }

    /// Rules to install on a newly connected switch, in ascending priority
    pub fn on_switch_connected(&self, switch: SwitchId) -> Vec<FlowRule> {
        // The entry stays locked while the table is read, so a concurrent
        // `sync_rules` either runs after the insert or sees a table no newer
        // than the one read here.
        let entry = self.installed.entry(switch);
        let current = self.table.all_virtual_addresses();
        let rules = self.policy.initial_rules(&current);
        info!(
            switch = %switch,
            rules = rules.len(),
            virtual_addresses = current.len(),
            "Switch connected"
        );
        entry.insert(current);
        self.stats.switches_connected.fetch_add(1, Ordering::Relaxed);
        rules
    }

    /// Forget a switch
    pub fn on_switch_disconnected(&self, switch: SwitchId) {
        if self.installed.remove(&switch).is_some() {
            info!(switch = %switch, "Switch disconnected");
        }
    }

    /// Handle a frame sent up by a switch
    pub fn on_packet_arrived(
        &self,
        switch: SwitchId,
        metadata: PacketMetadata,
        frame: &[u8],
    ) -> PacketDisposition {
        self.stats.packet_ins.fetch_add(1, Ordering::Relaxed);
        trace!(switch = %switch, in_port = metadata.in_port, len = frame.len(), "Packet in");

        match self.classify(metadata, frame) {
            PacketClass::DnsResponse => {
                self.stats.dns_responses.fetch_add(1, Ordering::Relaxed);
                let snapshot = self.table.snapshot();
                match self.rewriter.rewrite(frame, &snapshot) {
                    Ok(outcome) => {
                        debug!(
                            switch = %switch,
                            in_port = metadata.in_port,
                            rewritten = outcome.rewritten,
                            "Flooding rewritten DNS response"
                        );
                        PacketDisposition::Emit(PacketOut::flood(metadata.in_port, outcome.frame))
                    }
                    // Logged by the rewriter
                    Err(_) => PacketDisposition::NoAction,
                }
            }
            PacketClass::VirtualDestination(destination) => {
                self.stats.virtual_hits.fetch_add(1, Ordering::Relaxed);
                match self.table.lookup_real(destination) {
                    Ok(real) => info!(
                        switch = %switch,
                        virtual_address = %destination,
                        real = %real,
                        "Packet to virtual address"
                    ),
                    Err(e) => debug!(
                        switch = %switch,
                        destination = %destination,
                        error = %e,
                        "Packet to stale virtual address"
                    ),
                }
                PacketDisposition::NoAction
            }
            PacketClass::Other => {
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                PacketDisposition::NoAction
            }
        }
    }

    fn classify(&self, metadata: PacketMetadata, frame: &[u8]) -> PacketClass {
        // The rewriter reports malformed frames sent up by the DNS rule
        if metadata.rule_priority == Some(DNS_RULE_PRIORITY) {
            return PacketClass::DnsResponse;
        }

        let Ok(ethernet) = EthernetHeader::parse(frame) else {
            return PacketClass::Other;
        };
        if ethernet.ethertype() != ETHERTYPE_IPV4 {
            return PacketClass::Other;
        }
        let Ok(ipv4) = Ipv4Header::parse(&frame[ethernet.len()..]) else {
            return PacketClass::Other;
        };

        if metadata.rule_priority == Some(VIRTUAL_RULE_PRIORITY) {
            PacketClass::VirtualDestination(ipv4.destination())
        } else if self.is_intercepted_dns(frame, ethernet.len(), &ipv4) {
            PacketClass::DnsResponse
        } else if self.table.snapshot().is_virtual_address(ipv4.destination()) {
            PacketClass::VirtualDestination(ipv4.destination())
        } else {
            PacketClass::Other
        }
    }

    fn is_intercepted_dns(&self, frame: &[u8], ip_offset: usize, ipv4: &Ipv4Header) -> bool {
        let config = self.policy.config();
        if ipv4.protocol() != IPPROTO_UDP {
            return false;
        }
        if config.resolver.is_some_and(|resolver| resolver != ipv4.source()) {
            return false;
        }
        if config.unmarked_only && ipv4.dscp() != 0 {
            return false;
        }
        let port_offset = ip_offset + ipv4.header_len();
        frame
            .get(port_offset..port_offset + 2)
            .is_some_and(|p| u16::from_be_bytes([p[0], p[1]]) == config.dns_source_port)
    }

    /// Bring every connected switch's virtual-address rules up to date
    pub fn sync_rules(&self) -> Vec<RuleUpdate> {
        let current = self.table.all_virtual_addresses();
        let mut updates = Vec::new();

        for mut entry in self.installed.iter_mut() {
            let commands = self.policy.reconcile(entry.value(), &current);
            if commands.is_empty() {
                continue;
            }
            *entry.value_mut() = current.clone();
            updates.push(RuleUpdate {
                switch: *entry.key(),
                commands,
            });
        }

        self.stats
            .rule_updates
            .fetch_add(updates.len() as u64, Ordering::Relaxed);
        updates
    }

    /// Start a task that pushes rule updates after every table change
    pub fn spawn_rule_sync(
        self: &Arc<Self>,
        updates: mpsc::Sender<RuleUpdate>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut changes = self.table.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            debug!("Mapping table closed, stopping rule sync");
                            return;
                        }
                        for update in controller.sync_rules() {
                            debug!(
                                switch = %update.switch,
                                commands = update.commands.len(),
                                "Sending rule update"
                            );
                            if updates.send(update).await.is_err() {
                                warn!("Rule update receiver closed, stopping rule sync");
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Rule sync stopped");
                        return;
                    }
                }
            }
        })
    }

    /// Switches with installed rules
    #[must_use]
    pub fn connected_switches(&self) -> Vec<SwitchId> {
        let mut switches: Vec<_> = self.installed.iter().map(|e| *e.key()).collect();
        switches.sort_unstable();
        switches
    }

    /// The mapping table
    #[must_use]
    pub fn table(&self) -> &Arc<AddressMappingTable> {
        &self.table
    }

    /// The DNS rewriter
    #[must_use]
    pub fn rewriter(&self) -> &DnsRewriter {
        &self.rewriter
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }
}
