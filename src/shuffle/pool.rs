//! Virtual address pool
//!
//! Candidates are drawn uniformly at random from the configured range and
//! rejected if they appear in the caller's exclusion set. The pool keeps no
//! record of what it handed out: availability is recomputed from the
//! mapping table on every request.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::error::PoolError;

/// Default number of random draws before falling back to a range scan
pub const DEFAULT_MAX_ATTEMPTS: usize = 64;

/// Ranges up to this size are scanned exhaustively once random draws fail
const COMPLEMENT_SCAN_LIMIT: u64 = 1 << 16;

/// IPv4 virtual address pool
#[derive(Debug)]
pub struct AddressPool {
    network: Ipv4Net,
    /// First usable address (inclusive)
    first: u32,
    /// Last usable address (inclusive)
    last: u32,
    max_attempts: usize,
    rng: Mutex<StdRng>,
}

impl AddressPool {
    /// Create a pool over the usable host addresses of `network`.
    ///
    /// Network and broadcast addresses are skipped for prefixes up to /30.
    #[must_use]
    pub fn new(network: Ipv4Net, max_attempts: usize) -> Self {
        Self::with_rng(network, max_attempts, StdRng::from_entropy())
    }

    /// Create a pool with a deterministic random source
    #[must_use]
    pub fn with_seed(network: Ipv4Net, max_attempts: usize, seed: u64) -> Self {
        Self::with_rng(network, max_attempts, StdRng::seed_from_u64(seed))
    }

    fn with_rng(network: Ipv4Net, max_attempts: usize, rng: StdRng) -> Self {
        let network = network.trunc();
        let base = u32::from(network.network());
        let top = u32::from(network.broadcast());
        let (first, last) = if network.prefix_len() <= 30 {
            (base + 1, top - 1)
        } else {
            (base, top)
        };
        Self {
            network,
            first,
            last,
            max_attempts: max_attempts.max(1),
            rng: Mutex::new(rng),
        }
    }

    /// Draw one address that is not in `excluding`.
    ///
    /// # Errors
    /// Returns `PoolError::Exhausted` if no free address exists, or if the
    /// range is too large to scan and every random draw collided.
    pub fn allocate(&self, excluding: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr, PoolError> {
        {
            let mut rng = self.rng.lock();
            for _ in 0..self.max_attempts {
                let candidate = Ipv4Addr::from(rng.gen_range(self.first..=self.last));
                if !excluding.contains(&candidate) {
                    trace!(address = %candidate, "Pool draw");
                    return Ok(candidate);
                }
            }
        }

        // High occupancy: sample the complement directly
        let available = self.available(excluding);
        if available == 0 || self.size() > COMPLEMENT_SCAN_LIMIT {
            debug!(range = %self.network, available, "Pool exhausted");
            return Err(PoolError::Exhausted {
                range: self.network,
                requested: 1,
                available: usize::try_from(available).unwrap_or(usize::MAX),
            });
        }

        let free: Vec<u32> = (self.first..=self.last)
            .filter(|raw| !excluding.contains(&Ipv4Addr::from(*raw)))
            .collect();
        let pick = free[self.rng.lock().gen_range(0..free.len())];
        Ok(Ipv4Addr::from(pick))
    }

    /// Draw `count` addresses that are pairwise distinct and not in
    /// `excluding`.
    ///
    /// # Errors
    /// Returns `PoolError::Exhausted` rather than a duplicate when fewer
    /// than `count` free addresses remain.
    pub fn allocate_distinct(
        &self,
        count: usize,
        excluding: &HashSet<Ipv4Addr>,
    ) -> Result<Vec<Ipv4Addr>, PoolError> {
        let mut taken = excluding.clone();
        let mut batch = Vec::with_capacity(count);

        for _ in 0..count {
            match self.allocate(&taken) {
                Ok(address) => {
                    taken.insert(address);
                    batch.push(address);
                }
                Err(PoolError::Exhausted { .. }) => {
                    return Err(PoolError::Exhausted {
                        range: self.network,
                        requested: count,
                        available: usize::try_from(self.available(excluding)).unwrap_or(usize::MAX),
                    });
                }
            }
        }

        Ok(batch)
    }

    /// Number of usable addresses not in `excluding`
    #[must_use]
    pub fn available(&self, excluding: &HashSet<Ipv4Addr>) -> u64 {
        let excluded_in_range = excluding.iter().filter(|a| self.contains(**a)).count() as u64;
        self.size().saturating_sub(excluded_in_range)
    }

    /// Check if an address is a usable member of this pool
    #[must_use]
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let raw = u32::from(address);
        (self.first..=self.last).contains(&raw)
    }

    /// Total number of usable addresses
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from(self.last - self.first) + 1
    }

    /// The configured range
    #[must_use]
    pub fn network(&self) -> Ipv4Net {
        self.network
    }
}
