//! mtd-shuffler: moving target defense for an SDN-managed LAN
//!
//! Every protected host keeps its real address internally but is known to
//! the outside by a virtual address that is periodically reassigned. DNS
//! answers are rewritten on their way to the requester so names always
//! resolve to the current virtual address.
//!
//! # Features
//!
//! - **Mapping table**: lock-free snapshots of the real/virtual bijection
//! - **Shuffling**: uniform or per-priority-tier reassignment loops
//! - **Flow rules**: default, DNS interception and per-virtual-address rules,
//!   kept in sync with the table
//! - **DNS rewriting**: A-record rewrite with IPv4/UDP checksum recompute
//!
//! # Architecture
//!
//! ```text
//! Switch adapter ──events──► MtdController ──lookups──► AddressMappingTable
//!        ▲                        │                            ▲
//!        └──rules / packet-outs───┘                            │ assign
//!                                                    ShufflingScheduler
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mtd_shuffler::config::load_config;
//! use mtd_shuffler::flow::FlowRulePolicy;
//! use mtd_shuffler::{AddressMappingTable, MtdController, ShufflingScheduler, SwitchId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/mtd-shuffler/config.json")?;
//!
//! let pool = Arc::new(config.pool.build());
//! let table = Arc::new(AddressMappingTable::bootstrap(&config.host_specs(), &pool)?);
//!
//! let scheduler = Arc::new(ShufflingScheduler::new(
//!     Arc::clone(&table),
//!     pool,
//!     config.scheduler_config(),
//! ));
//! let handle = scheduler.spawn();
//!
//! let controller = MtdController::new(
//!     table,
//!     FlowRulePolicy::new(config.dns.flow_policy_config()),
//!     config.dns.rewriter(),
//! );
//! let rules = controller.on_switch_connected(SwitchId(1));
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`controller`]: Switch event handling and rule synchronisation
//! - [`diagnostics`]: Mapping table monitor
//! - [`error`]: Error types
//! - [`flow`]: Flow rule model and policy
//! - [`mapping`]: Real/virtual address mapping table
//! - [`packet`]: Header parsing, checksums and DNS rewriting
//! - [`shuffle`]: Address pool and shuffling scheduler

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod flow;
pub mod mapping;
pub mod packet;
pub mod shuffle;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use controller::{MtdController, PacketDisposition, PacketMetadata, PacketOut, RuleUpdate, SwitchId};
pub use error::{ConfigError, MappingError, MtdError, PacketError, PoolError};
pub use flow::{FlowAction, FlowCommand, FlowMatch, FlowRule, FlowRulePolicy};
pub use mapping::{AddressMappingTable, HostRecord, HostSpec, MappingSnapshot};
pub use packet::{DnsRewriter, RewriteOutcome};
pub use shuffle::{AddressPool, SchedulerHandle, ShufflePolicy, ShufflingScheduler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
