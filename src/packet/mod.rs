//! Packet parsing and DNS answer rewriting
//!
//! Frames are handled as raw bytes. [`headers`] gives typed, bounds-checked
//! views of the Ethernet/IPv4/UDP layers, [`dns`] walks the DNS message
//! with an explicit cursor, and [`DnsRewriter`] ties them together.

pub mod checksum;
pub mod dns;
pub mod headers;
pub mod rewriter;

pub use headers::{EthernetHeader, Ipv4Header, UdpFrame, UdpHeader};
pub use rewriter::{DnsRewriter, RewriteOutcome, RewriteStats, RewriteStatsSnapshot};
