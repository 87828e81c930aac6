//! Bidirectional real/virtual address table
//!
//! Readers load an immutable [`MappingSnapshot`] through `ArcSwap`, so a
//! lookup never blocks and always sees the forward and reverse indices from
//! the same point in time. Writers serialise on a mutex, build the next
//! snapshot from the current one and publish it with a single pointer swap.
//!
//! ```text
//! assign() -> lock -> load -> check -> clone + mutate -> store -> notify
//! lookup   -> load -> read (lock-free)
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::record::{HostRecord, HostSpec};
use crate::error::{MappingError, MtdError};
use crate::shuffle::AddressPool;

/// Immutable view of the table at one generation
#[derive(Debug, Clone, Default)]
pub struct MappingSnapshot {
    /// real -> record
    records: HashMap<Ipv4Addr, HostRecord>,
    /// virtual -> real
    by_virtual: HashMap<Ipv4Addr, Ipv4Addr>,
    generation: u64,
}

impl MappingSnapshot {
    /// Current virtual address of a host
    ///
    /// # Errors
    /// Returns `MappingError::UnknownHost` if no record exists.
    pub fn lookup_virtual(&self, real: Ipv4Addr) -> Result<Ipv4Addr, MappingError> {
        self.records
            .get(&real)
            .map(HostRecord::virtual_address)
            .ok_or(MappingError::UnknownHost { address: real })
    }

    /// Real address currently behind a virtual address
    ///
    /// # Errors
    /// Returns `MappingError::UnknownVirtual` if the address is not assigned.
    pub fn lookup_real(&self, virtual_address: Ipv4Addr) -> Result<Ipv4Addr, MappingError> {
        self.by_virtual
            .get(&virtual_address)
            .copied()
            .ok_or(MappingError::UnknownVirtual {
                address: virtual_address,
            })
    }

    /// Record for a real address
    #[must_use]
    pub fn record(&self, real: Ipv4Addr) -> Option<&HostRecord> {
        self.records.get(&real)
    }

    /// Iterate over all records (unordered)
    pub fn records(&self) -> impl Iterator<Item = &HostRecord> {
        self.records.values()
    }

    /// All currently assigned virtual addresses
    #[must_use]
    pub fn virtual_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.by_virtual.keys().copied().collect()
    }

    /// Real and virtual addresses; nothing in this set may be handed out
    #[must_use]
    pub fn occupied_addresses(&self) -> HashSet<Ipv4Addr> {
        self.records
            .keys()
            .chain(self.by_virtual.keys())
            .copied()
            .collect()
    }

    /// Check whether an address is a known real address
    #[must_use]
    pub fn is_real_address(&self, address: Ipv4Addr) -> bool {
        self.records.contains_key(&address)
    }

    /// Check whether an address is a currently assigned virtual address
    #[must_use]
    pub fn is_virtual_address(&self, address: Ipv4Addr) -> bool {
        self.by_virtual.contains_key(&address)
    }

    /// Number of host records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the table has no hosts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Monotonic mutation counter
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Verify the bijection and no-self-collision invariants
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.records.len() != self.by_virtual.len() {
            return false;
        }
        self.records.values().all(|record| {
            self.by_virtual.get(&record.virtual_address()) == Some(&record.real_address())
                && !self.records.contains_key(&record.virtual_address())
        })
    }

    fn check_assignable(&self, real: Ipv4Addr, virtual_address: Ipv4Addr) -> Result<(), MappingError> {
        if !self.records.contains_key(&real) {
            return Err(MappingError::UnknownHost { address: real });
        }
        if self.records.contains_key(&virtual_address) {
            return Err(MappingError::RealAddressCollision {
                address: virtual_address,
            });
        }
        match self.by_virtual.get(&virtual_address) {
            Some(&owner) if owner != real => Err(MappingError::Collision {
                address: virtual_address,
                owner,
            }),
            _ => Ok(()),
        }
    }

    fn check_insertable(&self, spec: &HostSpec, virtual_address: Ipv4Addr) -> Result<(), MappingError> {
        let real = spec.real_address;
        if self.records.contains_key(&real) {
            return Err(MappingError::DuplicateHost { address: real });
        }
        if let Some(&owner) = self.by_virtual.get(&real) {
            // The new real address is someone's alias right now
            return Err(MappingError::Collision {
                address: real,
                owner,
            });
        }
        if virtual_address == real || self.records.contains_key(&virtual_address) {
            return Err(MappingError::RealAddressCollision {
                address: virtual_address,
            });
        }
        if let Some(&owner) = self.by_virtual.get(&virtual_address) {
            return Err(MappingError::Collision {
                address: virtual_address,
                owner,
            });
        }
        Ok(())
    }
}

/// Statistics for the mapping table
#[derive(Debug, Default)]
pub struct MappingStats {
    /// Successful assignments
    pub assignments: AtomicU64,
    /// Assignments rejected with a collision
    pub collisions: AtomicU64,
}

impl MappingStats {
    /// Get a snapshot of current stats
    #[must_use]
    pub fn snapshot(&self) -> MappingStatsSnapshot {
        MappingStatsSnapshot {
            assignments: self.assignments.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of mapping statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingStatsSnapshot {
    /// Successful assignments
    pub assignments: u64,
    /// Rejected assignments
    pub collisions: u64,
}

/// The real/virtual address bijection shared by the scheduler and the
/// packet path.
///
/// [`assign`](Self::assign) is the only way a virtual address changes.
#[derive(Debug)]
pub struct AddressMappingTable {
    current: ArcSwap<MappingSnapshot>,
    write_lock: Mutex<()>,
    changes: watch::Sender<u64>,
    stats: MappingStats,
}

impl Default for AddressMappingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressMappingTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(MappingSnapshot::default()),
            write_lock: Mutex::new(()),
            changes,
            stats: MappingStats::default(),
        }
    }

    /// Build a table for the given hosts, drawing initial virtual addresses
    /// from `pool` for every host without a pinned one.
    ///
    /// # Errors
    /// Returns an error if a pinned address collides, a real address is
    /// duplicated, or the pool cannot cover every host.
    pub fn bootstrap(specs: &[HostSpec], pool: &AddressPool) -> Result<Self, MtdError> {
        let table = Self::new();

        // Reserve every real and pinned address up front so an early draw
        // cannot take the real address of a host registered later.
        let mut reserved: HashSet<Ipv4Addr> = specs
            .iter()
            .flat_map(|spec| std::iter::once(spec.real_address).chain(spec.virtual_address))
            .collect();

        for spec in specs {
            let virtual_address = match spec.virtual_address {
                Some(address) => address,
                None => {
                    let address = pool.allocate(&reserved)?;
                    reserved.insert(address);
                    address
                }
            };
            table.insert_host(spec, virtual_address)?;
        }

        debug!(hosts = table.len(), "Mapping table bootstrapped");
        Ok(table)
    }

    /// Register a host with its initial virtual address
    ///
    /// # Errors
    /// Returns `DuplicateHost` or a collision error if the invariants
    /// would be broken.
    pub fn insert_host(&self, spec: &HostSpec, virtual_address: Ipv4Addr) -> Result<(), MappingError> {
        let guard = self.write_lock.lock();
        let current = self.current.load_full();
        current.check_insertable(spec, virtual_address)?;

        let mut next = MappingSnapshot::clone(&current);
        next.records.insert(
            spec.real_address,
            HostRecord::new(spec, virtual_address, Instant::now()),
        );
        next.by_virtual.insert(virtual_address, spec.real_address);
        next.generation += 1;
        let generation = next.generation;
        self.current.store(Arc::new(next));
        drop(guard);

        debug!(
            real = %spec.real_address,
            virtual_address = %virtual_address,
            priority = spec.priority,
            "Registered host"
        );
        self.changes.send_replace(generation);
        Ok(())
    }

    /// Atomically move a host to a new virtual address.
    ///
    /// Returns the previous virtual address. Assigning the address the host
    /// already holds only refreshes its timestamp.
    ///
    /// # Errors
    /// Returns `Collision` if another host holds `virtual_address`,
    /// `RealAddressCollision` if it is a real address, or `UnknownHost`.
    pub fn assign(&self, real: Ipv4Addr, virtual_address: Ipv4Addr) -> Result<Ipv4Addr, MappingError> {
        let guard = self.write_lock.lock();
        let current = self.current.load_full();
        if let Err(e) = current.check_assignable(real, virtual_address) {
            if e.is_collision() {
                self.stats.collisions.fetch_add(1, Ordering::Relaxed);
            }
            return Err(e);
        }

        let mut next = MappingSnapshot::clone(&current);
        let Some(record) = next.records.get_mut(&real) else {
            return Err(MappingError::UnknownHost { address: real });
        };
        let previous = record.virtual_address();
        record.reassign(virtual_address, Instant::now());
        next.by_virtual.remove(&previous);
        next.by_virtual.insert(virtual_address, real);
        next.generation += 1;
        let generation = next.generation;
        self.current.store(Arc::new(next));
        drop(guard);

        self.stats.assignments.fetch_add(1, Ordering::Relaxed);
        trace!(real = %real, from = %previous, to = %virtual_address, "Virtual address assigned");
        self.changes.send_replace(generation);
        Ok(previous)
    }

    /// Current virtual address of a host
    ///
    /// # Errors
    /// Returns `MappingError::UnknownHost` if no record exists.
    pub fn lookup_virtual(&self, real: Ipv4Addr) -> Result<Ipv4Addr, MappingError> {
        self.current.load().lookup_virtual(real)
    }

    /// Real address behind a virtual address
    ///
    /// # Errors
    /// Returns `MappingError::UnknownVirtual` if the address is not assigned.
    pub fn lookup_real(&self, virtual_address: Ipv4Addr) -> Result<Ipv4Addr, MappingError> {
        self.current.load().lookup_real(virtual_address)
    }

    /// Every assigned virtual address, taken from a single snapshot
    #[must_use]
    pub fn all_virtual_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.current.load().virtual_addresses()
    }

    /// Consistent point-in-time view of the whole table
    #[must_use]
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.current.load_full()
    }

    /// Read-only copy of every record, ordered by real address
    #[must_use]
    pub fn snapshot_for_diagnostics(&self) -> Vec<HostRecord> {
        let snapshot = self.current.load();
        let mut records: Vec<HostRecord> = snapshot.records().cloned().collect();
        records.sort_by_key(HostRecord::real_address);
        records
    }

    /// Subscribe to change notifications; the value is the new generation
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Number of host records
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    /// Check if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &MappingStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn test_table() -> AddressMappingTable {
        let table = AddressMappingTable::new();
        table.insert_host(&HostSpec::new(addr(1), 1), addr(101)).unwrap();
        table.insert_host(&HostSpec::new(addr(2), 2), addr(102)).unwrap();
        table.insert_host(&HostSpec::new(addr(3), 2), addr(103)).unwrap();
        table
    }

    #[test]
    fn test_insert_and_lookup() {
        let table = test_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup_virtual(addr(2)).unwrap(), addr(102));
        assert_eq!(table.lookup_real(addr(102)).unwrap(), addr(2));
        assert!(matches!(
            table.lookup_virtual(addr(9)),
            Err(MappingError::UnknownHost { .. })
        ));
        assert!(matches!(
            table.lookup_real(addr(2)),
            Err(MappingError::UnknownVirtual { .. })
        ));
    }

    #[test]
    fn test_assign_moves_reverse_index() {
        let table = test_table();
        let previous = table.assign(addr(2), addr(77)).unwrap();
        assert_eq!(previous, addr(102));
        assert_eq!(table.lookup_virtual(addr(2)).unwrap(), addr(77));
        assert_eq!(table.lookup_real(addr(77)).unwrap(), addr(2));
        assert!(table.lookup_real(addr(102)).is_err());
        assert!(table.snapshot().is_consistent());
        assert_eq!(table.snapshot().record(addr(2)).unwrap().shuffle_count(), 1);
    }

    #[test]
    fn test_assign_rejects_shared_virtual() {
        let table = test_table();
        let err = table.assign(addr(2), addr(101)).unwrap_err();
        assert_eq!(
            err,
            MappingError::Collision {
                address: addr(101),
                owner: addr(1)
            }
        );
        // Nothing moved
        assert_eq!(table.lookup_virtual(addr(2)).unwrap(), addr(102));
        assert_eq!(table.stats().snapshot().collisions, 1);
    }

    #[test]
    fn test_assign_rejects_real_address() {
        let table = test_table();
        assert!(matches!(
            table.assign(addr(2), addr(3)),
            Err(MappingError::RealAddressCollision { .. })
        ));
        // A host may not alias its own real address either
        assert!(matches!(
            table.assign(addr(2), addr(2)),
            Err(MappingError::RealAddressCollision { .. })
        ));
    }

    #[test]
    fn test_assign_same_address_refreshes() {
        let table = test_table();
        let before = table.snapshot().generation();
        assert_eq!(table.assign(addr(1), addr(101)).unwrap(), addr(101));
        assert!(table.snapshot().generation() > before);
        assert!(table.snapshot().is_consistent());
        // Not a shuffle
        assert_eq!(table.snapshot().record(addr(1)).unwrap().shuffle_count(), 0);

        table.assign(addr(1), addr(150)).unwrap();
        table.assign(addr(1), addr(150)).unwrap();
        assert_eq!(table.snapshot().record(addr(1)).unwrap().shuffle_count(), 1);
    }

    #[test]
    fn test_assign_unknown_host() {
        let table = test_table();
        assert!(matches!(
            table.assign(addr(50), addr(150)),
            Err(MappingError::UnknownHost { .. })
        ));
    }

    #[test]
    fn test_insert_rejects_duplicates_and_collisions() {
        let table = test_table();
        assert!(matches!(
            table.insert_host(&HostSpec::new(addr(1), 1), addr(200)),
            Err(MappingError::DuplicateHost { .. })
        ));
        // New real address currently in use as a virtual one
        assert!(matches!(
            table.insert_host(&HostSpec::new(addr(101), 1), addr(200)),
            Err(MappingError::Collision { .. })
        ));
        assert!(matches!(
            table.insert_host(&HostSpec::new(addr(4), 1), addr(4)),
            Err(MappingError::RealAddressCollision { .. })
        ));
        assert!(matches!(
            table.insert_host(&HostSpec::new(addr(4), 1), addr(102)),
            Err(MappingError::Collision { .. })
        ));
    }

    #[test]
    fn test_all_virtual_addresses() {
        let table = test_table();
        let all = table.all_virtual_addresses();
        assert_eq!(all.into_iter().collect::<Vec<_>>(), vec![addr(101), addr(102), addr(103)]);
    }

    #[test]
    fn test_snapshot_is_stable_across_assign() {
        let table = test_table();
        let before = table.snapshot();
        table.assign(addr(1), addr(90)).unwrap();
        // An already loaded snapshot keeps its own point in time
        assert_eq!(before.lookup_virtual(addr(1)).unwrap(), addr(101));
        assert_eq!(table.lookup_virtual(addr(1)).unwrap(), addr(90));
    }

    #[test]
    fn test_diagnostics_sorted() {
        let table = test_table();
        let records = table.snapshot_for_diagnostics();
        let reals: Vec<_> = records.iter().map(HostRecord::real_address).collect();
        assert_eq!(reals, vec![addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn test_subscribe_sees_generation() {
        let table = test_table();
        let mut rx = table.subscribe();
        let seen = *rx.borrow_and_update();
        table.assign(addr(3), addr(93)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update() > seen);
    }

    #[test]
    fn test_bijection_holds_over_assign_sequence() {
        let table = test_table();
        let reals = [addr(1), addr(2), addr(3)];
        // Deterministic sequence that includes collisions and self-collisions
        for step in 0u8..200 {
            let real = reals[usize::from(step) % 3];
            let candidate = addr(step % 12 + 1);
            let _ = table.assign(real, candidate);

            let snapshot = table.snapshot();
            assert!(snapshot.is_consistent(), "inconsistent after step {step}");
            for record in snapshot.records() {
                assert!(!snapshot.is_real_address(record.virtual_address()));
            }
        }
    }

    #[test]
    fn test_concurrent_assign_and_read() {
        use std::thread;

        let table = Arc::new(test_table());
        let mut handles = vec![];

        for writer in 0..3u8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..200u16 {
                    let candidate = Ipv4Addr::new(10, 0, 1 + writer, (i % 250) as u8 + 1);
                    let _ = table.assign(addr(writer + 1), candidate);
                }
            }));
        }

        for _ in 0..3 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = table.snapshot();
                    assert!(snapshot.is_consistent());
                    assert_eq!(snapshot.virtual_addresses().len(), 3);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(table.snapshot().is_consistent());
    }
}
