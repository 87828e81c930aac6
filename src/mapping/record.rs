//! Host records held by the mapping table

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;

/// Shuffle tier of a host. Tiers with a larger weight shuffle more often.
pub type PriorityTier = u8;

/// Description of a host to register at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    /// Optional display name (e.g. "h2")
    pub name: Option<String>,
    /// Stable internal address
    pub real_address: Ipv4Addr,
    /// Shuffle tier
    pub priority: PriorityTier,
    /// Fixed initial virtual address; drawn from the pool when `None`
    pub virtual_address: Option<Ipv4Addr>,
}

impl HostSpec {
    /// Create a spec with a pool-drawn initial virtual address
    #[must_use]
    pub fn new(real_address: Ipv4Addr, priority: PriorityTier) -> Self {
        Self {
            name: None,
            real_address,
            priority,
            virtual_address: None,
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pin the initial virtual address
    #[must_use]
    pub fn with_virtual_address(mut self, address: Ipv4Addr) -> Self {
        self.virtual_address = Some(address);
        self
    }
}

/// One record per known real address.
///
/// Records are only mutated through
/// [`AddressMappingTable::assign`](super::AddressMappingTable::assign);
/// everything else sees cloned, read-only copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    name: Option<String>,
    real_address: Ipv4Addr,
    virtual_address: Ipv4Addr,
    priority: PriorityTier,
    last_shuffled_at: Instant,
    shuffle_count: u64,
}

impl HostRecord {
    pub(super) fn new(spec: &HostSpec, virtual_address: Ipv4Addr, now: Instant) -> Self {
        Self {
            name: spec.name.clone(),
            real_address: spec.real_address,
            virtual_address,
            priority: spec.priority,
            last_shuffled_at: now,
            shuffle_count: 0,
        }
    }

    /// Display name, if configured
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stable internal address
    #[must_use]
    pub fn real_address(&self) -> Ipv4Addr {
        self.real_address
    }

    /// Current externally visible alias
    #[must_use]
    pub fn virtual_address(&self) -> Ipv4Addr {
        self.virtual_address
    }

    /// Shuffle tier
    #[must_use]
    pub fn priority(&self) -> PriorityTier {
        self.priority
    }

    /// Time of the most recent reassignment (or registration)
    #[must_use]
    pub fn last_shuffled_at(&self) -> Instant {
        self.last_shuffled_at
    }

    /// Number of reassignments since registration
    #[must_use]
    pub fn shuffle_count(&self) -> u64 {
        self.shuffle_count
    }

    /// Time elapsed since the last reassignment
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_shuffled_at)
    }

    /// Record a new assignment. Re-assigning the held address only
    /// refreshes the timestamp.
    pub(super) fn reassign(&mut self, virtual_address: Ipv4Addr, now: Instant) {
        if virtual_address != self.virtual_address {
            self.virtual_address = virtual_address;
            self.shuffle_count += 1;
        }
        self.last_shuffled_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_spec_builder() {
        let spec = HostSpec::new(Ipv4Addr::new(10, 0, 0, 2), 1)
            .with_name("h2")
            .with_virtual_address(Ipv4Addr::new(10, 0, 0, 77));
        assert_eq!(spec.name.as_deref(), Some("h2"));
        assert_eq!(spec.virtual_address, Some(Ipv4Addr::new(10, 0, 0, 77)));
    }

    #[test]
    fn test_reassign_updates_metadata() {
        let start = Instant::now();
        let spec = HostSpec::new(Ipv4Addr::new(10, 0, 0, 2), 2);
        let mut record = HostRecord::new(&spec, Ipv4Addr::new(10, 0, 0, 77), start);
        assert_eq!(record.shuffle_count(), 0);

        let later = start + Duration::from_secs(5);
        record.reassign(Ipv4Addr::new(10, 0, 0, 88), later);

        assert_eq!(record.virtual_address(), Ipv4Addr::new(10, 0, 0, 88));
        assert_eq!(record.real_address(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(record.last_shuffled_at(), later);
        assert_eq!(record.shuffle_count(), 1);
        assert_eq!(record.age(later + Duration::from_secs(3)), Duration::from_secs(3));
        // Clock skew never produces a negative age
        assert_eq!(record.age(start), Duration::ZERO);
    }

    #[test]
    fn test_reassign_same_address_keeps_count() {
        let start = Instant::now();
        let spec = HostSpec::new(Ipv4Addr::new(10, 0, 0, 2), 2);
        let mut record = HostRecord::new(&spec, Ipv4Addr::new(10, 0, 0, 77), start);

        let later = start + Duration::from_secs(5);
        record.reassign(Ipv4Addr::new(10, 0, 0, 77), later);

        assert_eq!(record.shuffle_count(), 0);
        assert_eq!(record.last_shuffled_at(), later);
    }
}
