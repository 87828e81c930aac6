//! Real/virtual address mapping
//!
//! Every host keeps a stable real address for internal routing and is
//! exposed under a virtual address that the shuffler rotates. This module
//! owns the bijection between the two.
//!
//! ## Invariants
//!
//! - every virtual address maps to exactly one real address
//! - no virtual address equals a real address in the table
//! - readers see the forward and reverse indices from one generation

pub mod record;
pub mod table;

pub use record::{HostRecord, HostSpec, PriorityTier};
pub use table::{AddressMappingTable, MappingSnapshot, MappingStats, MappingStatsSnapshot};
