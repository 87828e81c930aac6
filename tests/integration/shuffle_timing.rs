//! Shuffling cadence and allocation behaviour under simulated time

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use mtd_shuffler::shuffle::{SchedulerConfig, TierWeights};
use mtd_shuffler::{
    AddressMappingTable, AddressPool, HostSpec, PoolError, ShufflePolicy, ShufflingScheduler,
};
use tokio::time;

fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn lab_hosts() -> Vec<HostSpec> {
    vec![
        HostSpec::new(addr(1), 1).with_name("h1"),
        HostSpec::new(addr(2), 2).with_name("h2"),
        HostSpec::new(addr(3), 2).with_name("h3"),
        HostSpec::new(addr(4), 2).with_name("h4"),
    ]
}

fn scheduler(policy: ShufflePolicy) -> Arc<ShufflingScheduler> {
    let pool = Arc::new(AddressPool::with_seed("10.0.0.0/24".parse().unwrap(), 64, 2024));
    let table = Arc::new(AddressMappingTable::bootstrap(&lab_hosts(), &pool).unwrap());
    Arc::new(ShufflingScheduler::new(table, pool, SchedulerConfig::new(policy)))
}

#[tokio::test(start_paused = true)]
async fn test_priority_tiers_over_sixty_seconds() {
    let scheduler = scheduler(ShufflePolicy::Priority {
        base_interval: Duration::from_secs(30),
        weights: TierWeights::new([(1, 4.0), (2, 1.0)]),
    });
    let table = Arc::clone(scheduler.table());
    let handle = scheduler.spawn();

    time::sleep(Duration::from_secs(61)).await;

    let snapshot = table.snapshot();
    assert_eq!(snapshot.record(addr(1)).unwrap().shuffle_count(), 8);
    for real in [addr(2), addr(3), addr(4)] {
        assert_eq!(snapshot.record(real).unwrap().shuffle_count(), 2);
    }
    assert!(snapshot.is_consistent());

    scheduler.shutdown();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_tier_reassigns_within_interval() {
    let scheduler = scheduler(ShufflePolicy::Priority {
        base_interval: Duration::from_secs(30),
        weights: TierWeights::new([(1, 4.0), (2, 1.0)]),
    });
    let table = Arc::clone(scheduler.table());
    let handle = scheduler.spawn();

    let start = table.lookup_virtual(addr(2)).unwrap();
    time::sleep(Duration::from_millis(29_900)).await;
    assert_eq!(table.lookup_virtual(addr(2)).unwrap(), start);
    time::sleep(Duration::from_millis(200)).await;
    assert_ne!(table.lookup_virtual(addr(2)).unwrap(), start);

    scheduler.shutdown();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_uniform_rounds_move_every_host() {
    let scheduler = scheduler(ShufflePolicy::Uniform {
        interval: Duration::from_secs(5),
    });
    let table = Arc::clone(scheduler.table());
    let handle = scheduler.spawn();
    let mut rx = table.subscribe();

    let before = table.snapshot();
    time::sleep(Duration::from_secs(6)).await;
    let after = table.snapshot();

    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();
    for record in before.records() {
        let moved = after.record(record.real_address()).unwrap();
        assert_ne!(moved.virtual_address(), record.virtual_address());
        assert_eq!(moved.shuffle_count(), 1);
    }
    let virtuals: HashSet<_> = after.records().map(|r| r.virtual_address()).collect();
    assert_eq!(virtuals.len(), 4);
    assert!(after.is_consistent());

    scheduler.shutdown();
    handle.join().await;
    assert_eq!(scheduler.stats().snapshot().rounds, 1);
}

#[test]
fn test_distinct_allocation_refuses_duplicates() {
    // /29 usable .1-.6; four taken leaves two
    let pool = AddressPool::with_seed("10.0.0.0/29".parse().unwrap(), 64, 5);
    let taken: HashSet<Ipv4Addr> = [1, 2, 3, 4].into_iter().map(addr).collect();

    let err = pool.allocate_distinct(3, &taken).unwrap_err();
    assert!(matches!(
        err,
        PoolError::Exhausted {
            requested: 3,
            available: 2,
            ..
        }
    ));

    let pair = pool.allocate_distinct(2, &taken).unwrap();
    assert_ne!(pair[0], pair[1]);
    assert!(pair.iter().all(|a| !taken.contains(a)));
}

#[test]
fn test_bijection_holds_under_concurrent_shuffling() {
    let scheduler = scheduler(ShufflePolicy::Uniform {
        interval: Duration::from_secs(5),
    });
    let table = Arc::clone(scheduler.table());

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let _ = scheduler.shuffle_host(addr(i + 1));
                }
            })
        })
        .collect();

    let reader = {
        let table = Arc::clone(&table);
        std::thread::spawn(move || {
            for _ in 0..2000 {
                let snapshot = table.snapshot();
                assert!(snapshot.is_consistent());
                for record in snapshot.records() {
                    assert_eq!(
                        snapshot.lookup_real(record.virtual_address()).unwrap(),
                        record.real_address()
                    );
                }
            }
        })
    };

    for worker in workers {
        worker.join().unwrap();
    }
    reader.join().unwrap();

    let snapshot = table.snapshot();
    assert!(snapshot.is_consistent());
    let reals: HashSet<_> = snapshot.records().map(|r| r.real_address()).collect();
    assert!(snapshot.records().all(|r| !reals.contains(&r.virtual_address())));
}
