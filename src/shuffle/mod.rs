//! Virtual address allocation and periodic reassignment
//!
//! - [`AddressPool`] draws unused addresses from the configured range
//! - [`ShufflePolicy`] decides when hosts move (uniform or per priority tier)
//! - [`ShufflingScheduler`] runs the timer loops and writes to the mapping table

pub mod policy;
pub mod pool;
pub mod scheduler;
pub mod stats;

pub use policy::{
    clamp_interval, ShufflePolicy, TierWeights, DEFAULT_TIER_WEIGHT, MAX_SHUFFLE_INTERVAL,
    MIN_SHUFFLE_INTERVAL,
};
pub use pool::{AddressPool, DEFAULT_MAX_ATTEMPTS};
pub use scheduler::{
    SchedulerConfig, SchedulerHandle, ShufflingScheduler, DEFAULT_SHUFFLE_ATTEMPTS,
};
pub use stats::{ShuffleStats, ShuffleStatsSnapshot};
