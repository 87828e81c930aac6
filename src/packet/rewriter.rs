//! DNS response rewriting
//!
//! A-record answers carrying a host's real address are replaced in place by
//! the host's current virtual address. The frame keeps its length, so only
//! the IPv4 and UDP checksums need recomputing.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use super::checksum::{recalc_ipv4_checksum, recalc_udp_checksum};
use super::dns::{DnsCursor, DnsHeader, A_RDATA_LEN, DNS_HEADER_LEN, TYPE_A};
use super::headers::{set_dscp, UdpFrame, DSCP_MAX};
use crate::error::PacketError;
use crate::mapping::MappingSnapshot;

/// Result of rewriting one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Frame to emit, with checksums recomputed
    pub frame: Vec<u8>,
    /// Answers replaced with a virtual address
    pub rewritten: usize,
    /// A-record addresses with no mapping, passed through unchanged
    pub unknown: Vec<Ipv4Addr>,
}

/// Rewriter statistics
#[derive(Debug, Default)]
pub struct RewriteStats {
    /// Frames processed successfully
    pub packets: AtomicU64,
    /// A records replaced
    pub answers_rewritten: AtomicU64,
    /// A records with no mapping
    pub answers_unknown: AtomicU64,
    /// Frames dropped as malformed
    pub malformed: AtomicU64,
}

impl RewriteStats {
    /// Get a snapshot of current stats
    #[must_use]
    pub fn snapshot(&self) -> RewriteStatsSnapshot {
        RewriteStatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            answers_rewritten: self.answers_rewritten.load(Ordering::Relaxed),
            answers_unknown: self.answers_unknown.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of rewriter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStatsSnapshot {
    /// Frames processed
    pub packets: u64,
    /// A records replaced
    pub answers_rewritten: u64,
    /// A records with no mapping
    pub answers_unknown: u64,
    /// Malformed frames
    pub malformed: u64,
}

/// Rewrites A records in DNS responses
#[derive(Debug, Default)]
pub struct DnsRewriter {
    dscp_mark: Option<u8>,
    stats: RewriteStats,
}

impl DnsRewriter {
    /// Create a rewriter that leaves the DSCP field alone
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark rewritten frames with `dscp` so the interception rule can skip them
    #[must_use]
    pub fn with_dscp_mark(mut self, dscp: u8) -> Self {
        self.dscp_mark = Some(dscp & DSCP_MAX);
        self
    }

    /// DSCP applied to rewritten frames
    #[must_use]
    pub const fn dscp_mark(&self) -> Option<u8> {
        self.dscp_mark
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    /// Rewrite a DNS response frame against one mapping snapshot.
    ///
    /// # Errors
    /// Returns a `PacketError` if the frame is not a well-formed
    /// Ethernet/IPv4/UDP DNS response; nothing is emitted in that case.
    pub fn rewrite(
        &self,
        frame: &[u8],
        mapping: &MappingSnapshot,
    ) -> Result<RewriteOutcome, PacketError> {
        let result = self.rewrite_inner(frame, mapping);
        match &result {
            Ok(outcome) => {
                self.stats.packets.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .answers_rewritten
                    .fetch_add(outcome.rewritten as u64, Ordering::Relaxed);
                self.stats
                    .answers_unknown
                    .fetch_add(outcome.unknown.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, len = frame.len(), "Dropping malformed DNS response");
            }
        }
        result
    }

    fn rewrite_inner(
        &self,
        frame: &[u8],
        mapping: &MappingSnapshot,
    ) -> Result<RewriteOutcome, PacketError> {
        let layout = UdpFrame::parse(frame)?;
        let dns_offset = layout.payload_offset();
        let message = &frame[dns_offset..layout.udp_end()];

        let header = DnsHeader::parse(message)?;
        if !header.is_response() {
            return Err(PacketError::NotResponse);
        }

        let mut cursor = DnsCursor::new(message, DNS_HEADER_LEN);
        for _ in 0..header.qdcount {
            cursor.skip_question()?;
        }

        // Collect edits first so a malformed later record leaves no partial rewrite
        let mut edits = Vec::new();
        let mut unknown = Vec::new();
        for _ in 0..header.ancount {
            let record = cursor.read_record()?;
            if record.rtype != TYPE_A {
                continue;
            }
            if record.rdlength != A_RDATA_LEN {
                return Err(PacketError::BadRdata {
                    rtype: record.rtype,
                    length: record.rdlength,
                });
            }

            let at = record.rdata_offset;
            let real = Ipv4Addr::new(message[at], message[at + 1], message[at + 2], message[at + 3]);
            match mapping.lookup_virtual(real) {
                Ok(virtual_address) => {
                    trace!(real = %real, virtual_address = %virtual_address, "Rewriting A record");
                    edits.push((dns_offset + at, virtual_address));
                }
                Err(_) => {
                    warn!(
                        id = header.id,
                        address = %real,
                        "A record for unmapped address passed through"
                    );
                    unknown.push(real);
                }
            }
        }

        let mut out = frame.to_vec();
        for (offset, virtual_address) in &edits {
            out[*offset..*offset + 4].copy_from_slice(&virtual_address.octets());
        }

        let ip_range = layout.ip_header_range();
        if let Some(dscp) = self.dscp_mark {
            set_dscp(&mut out[ip_range.clone()], dscp);
        }
        recalc_ipv4_checksum(&mut out[ip_range]);
        recalc_udp_checksum(
            layout.ipv4.source(),
            layout.ipv4.destination(),
            &mut out[layout.udp_range()],
        );

        debug!(
            id = header.id,
            answers = header.ancount,
            rewritten = edits.len(),
            unknown = unknown.len(),
            "DNS response rewritten"
        );

        Ok(RewriteOutcome {
            frame: out,
            rewritten: edits.len(),
            unknown,
        })
    }
}
