//! Configuration types for mtd-shuffler
//!
//! Every section has serde defaults, so an empty JSON object is a valid
//! configuration describing the four-host lab topology.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::flow::FlowPolicyConfig;
use crate::mapping::{HostSpec, PriorityTier};
use crate::packet::headers::DSCP_MAX;
use crate::packet::DnsRewriter;
use crate::shuffle::{
    AddressPool, SchedulerConfig, ShufflePolicy, TierWeights, MAX_SHUFFLE_INTERVAL,
    MIN_SHUFFLE_INTERVAL,
};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Protected hosts
    #[serde(default = "default_hosts")]
    pub hosts: Vec<HostConfig>,

    /// Virtual address pool
    #[serde(default)]
    pub pool: PoolConfig,

    /// Shuffling policy
    #[serde(default)]
    pub shuffle: ShuffleConfig,

    /// DNS interception
    #[serde(default)]
    pub dns: DnsConfig,

    /// Mapping monitor
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.shuffle.validate()?;
        self.dns.validate()?;
        self.diagnostics.validate()?;
        self.log.validate()?;

        if self.hosts.is_empty() {
            return Err(ConfigError::validation("At least one host must be configured"));
        }

        let reals: HashSet<Ipv4Addr> = self.hosts.iter().map(|h| h.real_address).collect();
        if reals.len() != self.hosts.len() {
            let mut seen = HashSet::new();
            let duplicate = self
                .hosts
                .iter()
                .find(|h| !seen.insert(h.real_address))
                .map_or_else(String::new, |h| h.real_address.to_string());
            return Err(ConfigError::validation(format!(
                "Duplicate host real address: {duplicate}"
            )));
        }

        let mut names = HashSet::new();
        let mut pinned = HashSet::new();
        for host in &self.hosts {
            if let Some(name) = &host.name {
                if !names.insert(name.as_str()) {
                    return Err(ConfigError::validation(format!("Duplicate host name: {name}")));
                }
            }
            if let Some(virtual_address) = host.virtual_address {
                if reals.contains(&virtual_address) {
                    return Err(ConfigError::validation(format!(
                        "Virtual address {virtual_address} of host {} is a real host address",
                        host.real_address
                    )));
                }
                if !self.pool.range.contains(&virtual_address) {
                    return Err(ConfigError::validation(format!(
                        "Virtual address {virtual_address} of host {} is outside pool {}",
                        host.real_address, self.pool.range
                    )));
                }
                if !pinned.insert(virtual_address) {
                    return Err(ConfigError::validation(format!(
                        "Virtual address {virtual_address} is assigned to more than one host"
                    )));
                }
            }
        }

        // Every host needs a virtual address plus one spare to move into
        let pool = self.pool.build();
        let available = pool.available(&reals);
        let needed = self.hosts.len() as u64 + 1;
        if available < needed {
            return Err(ConfigError::validation(format!(
                "Pool {} has {available} free addresses, {} hosts need at least {needed}",
                self.pool.range,
                self.hosts.len()
            )));
        }

        Ok(())
    }

    /// Host specifications for table bootstrap
    #[must_use]
    pub fn host_specs(&self) -> Vec<HostSpec> {
        self.hosts.iter().map(HostConfig::to_spec).collect()
    }

    /// Scheduler configuration
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.shuffle.to_policy()).with_max_attempts(self.shuffle.max_attempts)
    }

    /// Create the default lab configuration: h1..h4 on 10.0.0.0/24, h1 in
    /// tier 1, h3 the resolver
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            hosts: default_hosts(),
            pool: PoolConfig::default(),
            shuffle: ShuffleConfig::default(),
            dns: DnsConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// One protected host
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HostConfig {
    /// Display name (e.g., "h1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Stable internal address
    pub real_address: Ipv4Addr,

    /// Priority tier
    #[serde(default = "default_priority")]
    pub priority: PriorityTier,

    /// Initial virtual address; drawn from the pool when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<Ipv4Addr>,
}

impl HostConfig {
    fn to_spec(&self) -> HostSpec {
        let mut spec = HostSpec::new(self.real_address, self.priority);
        if let Some(name) = &self.name {
            spec = spec.with_name(name.clone());
        }
        if let Some(virtual_address) = self.virtual_address {
            spec = spec.with_virtual_address(virtual_address);
        }
        spec
    }
}

/// Virtual address pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// CIDR range virtual addresses are drawn from
    #[serde(default = "default_pool_range")]
    pub range: Ipv4Net,

    /// Random draws before scanning the free addresses
    #[serde(default = "default_pool_attempts")]
    pub max_attempts: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            range: default_pool_range(),
            max_attempts: default_pool_attempts(),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::validation("pool.max_attempts must be > 0"));
        }
        Ok(())
    }

    /// Create the address pool
    #[must_use]
    pub fn build(&self) -> AddressPool {
        AddressPool::new(self.range, self.max_attempts)
    }
}

/// Shuffle policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShufflePolicyKind {
    /// All hosts together on one interval
    Uniform,
    /// Per-tier intervals
    Priority,
}

impl FromStr for ShufflePolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown shuffle policy '{other}'")),
        }
    }
}

impl fmt::Display for ShufflePolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::Priority => write!(f, "priority"),
        }
    }
}

/// Shuffling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShuffleConfig {
    /// Which policy runs
    #[serde(default = "default_policy")]
    pub policy: ShufflePolicyKind,

    /// Uniform policy: seconds between rounds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Priority policy: interval of a weight-1 tier in seconds
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,

    /// Priority policy: cadence multiplier per tier
    #[serde(default = "default_tier_weights")]
    pub tier_weights: BTreeMap<PriorityTier, f64>,

    /// Fresh draws per host before its shuffle is skipped for the cycle
    #[serde(default = "default_shuffle_attempts")]
    pub max_attempts: usize,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            interval_secs: default_interval_secs(),
            base_interval_secs: default_base_interval_secs(),
            tier_weights: default_tier_weights(),
            max_attempts: default_shuffle_attempts(),
        }
    }
}

impl ShuffleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::validation("shuffle.interval_secs must be > 0"));
        }
        if self.base_interval_secs == 0 {
            return Err(ConfigError::validation("shuffle.base_interval_secs must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::validation("shuffle.max_attempts must be > 0"));
        }
        let max_secs = MAX_SHUFFLE_INTERVAL.as_secs();
        if self.interval_secs > max_secs {
            return Err(ConfigError::validation(format!(
                "shuffle.interval_secs must be <= {max_secs}"
            )));
        }
        if self.base_interval_secs > max_secs {
            return Err(ConfigError::validation(format!(
                "shuffle.base_interval_secs must be <= {max_secs}"
            )));
        }

        let base_interval = Duration::from_secs(self.base_interval_secs);
        let weights = TierWeights::new(self.tier_weights.iter().map(|(t, w)| (*t, *w)));
        for (tier, weight) in &self.tier_weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(ConfigError::validation(format!(
                    "shuffle.tier_weights[{tier}] must be a positive number, got {weight}"
                )));
            }
            if weights.checked_interval_for(base_interval, *tier).is_none() {
                return Err(ConfigError::validation(format!(
                    "shuffle.tier_weights[{tier}] = {weight} gives a tier interval outside \
                     {MIN_SHUFFLE_INTERVAL:?}..={MAX_SHUFFLE_INTERVAL:?}"
                )));
            }
        }
        Ok(())
    }

    /// Build the runtime policy
    #[must_use]
    pub fn to_policy(&self) -> ShufflePolicy {
        match self.policy {
            ShufflePolicyKind::Uniform => ShufflePolicy::Uniform {
                interval: Duration::from_secs(self.interval_secs),
            },
            ShufflePolicyKind::Priority => ShufflePolicy::Priority {
                base_interval: Duration::from_secs(self.base_interval_secs),
                weights: TierWeights::new(self.tier_weights.iter().map(|(t, w)| (*t, *w))),
            },
        }
    }
}

/// DNS interception configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    /// UDP source port of intercepted responses
    #[serde(default = "default_dns_port")]
    pub source_port: u16,

    /// Only intercept responses from this resolver
    #[serde(default = "default_resolver")]
    pub resolver_address: Option<Ipv4Addr>,

    /// DSCP set on rewritten responses; the interception rule then only
    /// matches DSCP 0
    #[serde(default = "default_rewrite_dscp")]
    pub rewrite_dscp: Option<u8>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            source_port: default_dns_port(),
            resolver_address: default_resolver(),
            rewrite_dscp: default_rewrite_dscp(),
        }
    }
}

impl DnsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.source_port == 0 {
            return Err(ConfigError::validation("dns.source_port must be > 0"));
        }
        match self.rewrite_dscp {
            Some(0) => Err(ConfigError::validation(
                "dns.rewrite_dscp must be non-zero, DSCP 0 marks unrewritten responses",
            )),
            Some(dscp) if dscp > DSCP_MAX => Err(ConfigError::validation(format!(
                "dns.rewrite_dscp must be <= {DSCP_MAX}, got {dscp}"
            ))),
            _ => Ok(()),
        }
    }

    /// Inputs for the flow rule policy
    #[must_use]
    pub fn flow_policy_config(&self) -> FlowPolicyConfig {
        FlowPolicyConfig {
            dns_source_port: self.source_port,
            resolver: self.resolver_address,
            unmarked_only: self.rewrite_dscp.is_some(),
        }
    }

    /// Create the DNS rewriter
    #[must_use]
    pub fn rewriter(&self) -> DnsRewriter {
        match self.rewrite_dscp {
            Some(dscp) => DnsRewriter::new().with_dscp_mark(dscp),
            None => DnsRewriter::new(),
        }
    }
}

/// Mapping monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticsConfig {
    /// Log the mapping table periodically
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between dumps
    #[serde(default = "default_diagnostics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_diagnostics_interval_secs(),
        }
    }
}

impl DiagnosticsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval_secs == 0 {
            return Err(ConfigError::validation("diagnostics.interval_secs must be > 0"));
        }
        Ok(())
    }

    /// Interval between dumps
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

impl LogConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.format.as_str(), "json" | "text") {
            return Err(ConfigError::validation(format!(
                "log.format must be 'json' or 'text', got '{}'",
                self.format
            )));
        }
        Ok(())
    }
}

fn default_hosts() -> Vec<HostConfig> {
    (1..=4)
        .map(|n| HostConfig {
            name: Some(format!("h{n}")),
            real_address: Ipv4Addr::new(10, 0, 0, n),
            priority: if n == 1 { 1 } else { 2 },
            virtual_address: None,
        })
        .collect()
}

const fn default_priority() -> PriorityTier {
    1
}

fn default_pool_range() -> Ipv4Net {
    let base = Ipv4Addr::new(10, 0, 0, 0);
    Ipv4Net::new(base, 24).unwrap_or_else(|_| Ipv4Net::from(base))
}

const fn default_pool_attempts() -> usize {
    crate::shuffle::DEFAULT_MAX_ATTEMPTS
}

const fn default_policy() -> ShufflePolicyKind {
    ShufflePolicyKind::Priority
}

const fn default_interval_secs() -> u64 {
    5
}

const fn default_base_interval_secs() -> u64 {
    3600
}

fn default_tier_weights() -> BTreeMap<PriorityTier, f64> {
    BTreeMap::from([(1, 4.0), (2, 1.0)])
}

const fn default_shuffle_attempts() -> usize {
    crate::shuffle::DEFAULT_SHUFFLE_ATTEMPTS
}

const fn default_dns_port() -> u16 {
    crate::flow::DEFAULT_DNS_PORT
}

#[allow(clippy::unnecessary_wraps)]
const fn default_resolver() -> Option<Ipv4Addr> {
    Some(Ipv4Addr::new(10, 0, 0, 3))
}

#[allow(clippy::unnecessary_wraps)]
const fn default_rewrite_dscp() -> Option<u8> {
    Some(10)
}

const fn default_diagnostics_interval_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

const fn default_true() -> bool {
    true
}
