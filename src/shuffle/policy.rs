//! Shuffle timing policies

use std::collections::BTreeMap;
use std::time::Duration;

use crate::mapping::PriorityTier;

/// Weight applied to tiers that have no configured weight
pub const DEFAULT_TIER_WEIGHT: f64 = 1.0;

/// Shortest interval a shuffling loop runs with
pub const MIN_SHUFFLE_INTERVAL: Duration = Duration::from_millis(1);

/// Longest interval a shuffling loop runs with (one year)
pub const MAX_SHUFFLE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Clamp a loop period into `[MIN_SHUFFLE_INTERVAL, MAX_SHUFFLE_INTERVAL]`
#[must_use]
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_SHUFFLE_INTERVAL, MAX_SHUFFLE_INTERVAL)
}

/// Per-tier cadence multipliers.
///
/// A tier with weight `w` shuffles every `base_interval / w`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TierWeights(BTreeMap<PriorityTier, f64>);

impl TierWeights {
    /// Create from explicit `(tier, weight)` pairs
    #[must_use]
    pub fn new(weights: impl IntoIterator<Item = (PriorityTier, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    /// Weight for a tier, `DEFAULT_TIER_WEIGHT` if unconfigured
    #[must_use]
    pub fn weight(&self, tier: PriorityTier) -> f64 {
        self.0.get(&tier).copied().unwrap_or(DEFAULT_TIER_WEIGHT)
    }

    /// Check whether a tier has an explicit weight
    #[must_use]
    pub fn is_configured(&self, tier: PriorityTier) -> bool {
        self.0.contains_key(&tier)
    }

    /// Interval of a tier, or `None` if `base_interval / weight` is not
    /// representable or falls outside the supported loop periods
    #[must_use]
    pub fn checked_interval_for(
        &self,
        base_interval: Duration,
        tier: PriorityTier,
    ) -> Option<Duration> {
        Duration::try_from_secs_f64(base_interval.as_secs_f64() / self.weight(tier))
            .ok()
            .filter(|interval| (MIN_SHUFFLE_INTERVAL..=MAX_SHUFFLE_INTERVAL).contains(interval))
    }

    /// Effective interval of a tier, clamped to the supported loop periods
    #[must_use]
    pub fn interval_for(&self, base_interval: Duration, tier: PriorityTier) -> Duration {
        let seconds = base_interval.as_secs_f64() / self.weight(tier);
        Duration::try_from_secs_f64(seconds).map_or(MAX_SHUFFLE_INTERVAL, clamp_interval)
    }

    /// Iterate over configured tiers
    pub fn iter(&self) -> impl Iterator<Item = (PriorityTier, f64)> + '_ {
        self.0.iter().map(|(tier, weight)| (*tier, *weight))
    }
}

/// How the scheduler decides when hosts move
#[derive(Debug, Clone, PartialEq)]
pub enum ShufflePolicy {
    /// Every host moves together, once per `interval`
    Uniform {
        /// Time between rounds
        interval: Duration,
    },
    /// One timer per tier; a host moves once its tier interval has elapsed
    Priority {
        /// Interval of a weight-1 tier
        base_interval: Duration,
        /// Per-tier multipliers
        weights: TierWeights,
    },
}

impl ShufflePolicy {
    /// Short name used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uniform { .. } => "uniform",
            Self::Priority { .. } => "priority",
        }
    }
}
