//! Switch-facing behaviour: initial rules and rule synchronisation while
//! the scheduler runs

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use mtd_shuffler::config::Config;
use mtd_shuffler::flow::{FlowMatch, FlowRulePolicy, DEFAULT_RULE_PRIORITY, DNS_RULE_PRIORITY};
use mtd_shuffler::shuffle::SchedulerConfig;
use mtd_shuffler::{
    AddressMappingTable, AddressPool, FlowCommand, MtdController, PacketDisposition,
    PacketMetadata, ShufflePolicy, ShufflingScheduler, SwitchId,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time;

struct Lab {
    table: Arc<AddressMappingTable>,
    scheduler: Arc<ShufflingScheduler>,
    controller: Arc<MtdController>,
}

fn lab(policy: ShufflePolicy) -> Lab {
    let config = Config::default_config();
    let pool = Arc::new(AddressPool::with_seed(config.pool.range, 64, 99));
    let table = Arc::new(AddressMappingTable::bootstrap(&config.host_specs(), &pool).unwrap());
    let scheduler = Arc::new(ShufflingScheduler::new(
        Arc::clone(&table),
        pool,
        SchedulerConfig::new(policy),
    ));
    let controller = Arc::new(MtdController::new(
        Arc::clone(&table),
        FlowRulePolicy::new(config.dns.flow_policy_config()),
        config.dns.rewriter(),
    ));
    Lab {
        table,
        scheduler,
        controller,
    }
}

fn installed_after(
    installed: &mut BTreeSet<Ipv4Addr>,
    commands: &[FlowCommand],
) {
    for command in commands {
        let address = command.rule().matcher.ipv4_destination().unwrap();
        match command {
            FlowCommand::Add(_) => assert!(installed.insert(address)),
            FlowCommand::Delete(_) => assert!(installed.remove(&address)),
        }
    }
}

#[test]
fn test_switch_receives_lab_rule_set() {
    let lab = lab(ShufflePolicy::Uniform {
        interval: Duration::from_secs(5),
    });
    let rules = lab.controller.on_switch_connected(SwitchId(1));

    assert_eq!(rules.len(), 6);
    assert_eq!(rules[0].priority, DEFAULT_RULE_PRIORITY);
    assert_eq!(rules[0].matcher, FlowMatch::All);
    assert_eq!(rules[1].priority, DNS_RULE_PRIORITY);
    assert_eq!(
        rules[1].matcher,
        FlowMatch::DnsResponse {
            udp_src: 53,
            ipv4_src: Some(Ipv4Addr::new(10, 0, 0, 3)),
            ip_dscp: Some(0),
        }
    );
    let targets: BTreeSet<_> = rules[2..]
        .iter()
        .filter_map(|r| r.matcher.ipv4_destination())
        .collect();
    assert_eq!(targets, lab.table.all_virtual_addresses());
}

#[tokio::test(start_paused = true)]
async fn test_rules_follow_uniform_shuffles() {
    let lab = lab(ShufflePolicy::Uniform {
        interval: Duration::from_secs(5),
    });
    let rules = lab.controller.on_switch_connected(SwitchId(1));
    let mut installed: BTreeSet<_> = rules
        .iter()
        .filter_map(|r| r.matcher.ipv4_destination())
        .collect();

    let (update_tx, mut update_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sync = lab.controller.spawn_rule_sync(update_tx, shutdown_rx);
    let handle = lab.scheduler.spawn();

    time::sleep(Duration::from_secs(16)).await;
    lab.scheduler.shutdown();
    handle.join().await;
    shutdown_tx.send(()).unwrap();
    sync.await.unwrap();

    let mut updates = 0;
    while let Ok(update) = update_rx.try_recv() {
        assert_eq!(update.switch, SwitchId(1));
        installed_after(&mut installed, &update.commands);
        updates += 1;
    }
    assert!(updates >= 3, "expected an update per round, got {updates}");
    // No stale per-address rules remain
    assert_eq!(installed, lab.table.all_virtual_addresses());
    assert_eq!(lab.scheduler.stats().snapshot().rounds, 3);
}

#[tokio::test(start_paused = true)]
async fn test_virtual_destination_resolves_after_shuffle() {
    let lab = lab(ShufflePolicy::Uniform {
        interval: Duration::from_secs(5),
    });
    let handle = lab.scheduler.spawn();
    time::sleep(Duration::from_secs(6)).await;

    let h2_virtual = lab.table.lookup_virtual(Ipv4Addr::new(10, 0, 0, 2)).unwrap();
    let mut frame = vec![0u8; 12];
    frame.extend_from_slice(&[0x08, 0x00, 0x45, 0x00, 0x00, 28, 0, 0, 0, 0, 64, 1, 0, 0]);
    frame.extend_from_slice(&[10, 0, 0, 1]);
    frame.extend_from_slice(&h2_virtual.octets());
    frame.extend_from_slice(&[8, 0, 0, 0, 0, 0, 0, 0]);

    let disposition =
        lab.controller
            .on_packet_arrived(SwitchId(1), PacketMetadata::new(1), &frame);
    assert_eq!(disposition, PacketDisposition::NoAction);
    assert_eq!(lab.controller.stats().snapshot().virtual_hits, 1);

    lab.scheduler.shutdown();
    handle.join().await;
}
