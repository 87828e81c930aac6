//! DNS answer rewriting end to end: real resolver responses in, flooded
//! rewritten frames out

use std::net::Ipv4Addr;
use std::sync::Arc;

use mtd_shuffler::flow::{FlowAction, FlowPolicyConfig, FlowRulePolicy, DNS_RULE_PRIORITY};
use mtd_shuffler::{
    AddressMappingTable, DnsRewriter, HostSpec, MtdController, PacketDisposition, PacketError,
    PacketMetadata, SwitchId,
};

use super::support::{
    answer_addresses, checksums_valid, dns_frame, dns_payload, dns_response, udp_frame, RESOLVER,
};

fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn table() -> AddressMappingTable {
    let table = AddressMappingTable::new();
    table
        .insert_host(&HostSpec::new(addr(2), 2).with_name("h2"), addr(77))
        .unwrap();
    table
        .insert_host(&HostSpec::new(addr(4), 2).with_name("h4"), addr(91))
        .unwrap();
    table
}

fn controller() -> MtdController {
    MtdController::new(
        Arc::new(table()),
        FlowRulePolicy::new(
            FlowPolicyConfig::default()
                .with_resolver(RESOLVER)
                .with_unmarked_only(true),
        ),
        DnsRewriter::new().with_dscp_mark(10),
    )
}

#[test]
fn test_rewrites_h2_answer_to_virtual_address() {
    let table = table();
    let frame = dns_frame(&dns_response("h2.example.", &[addr(2)]));
    assert!(checksums_valid(&frame));

    let outcome = DnsRewriter::new().rewrite(&frame, &table.snapshot()).unwrap();

    assert_eq!(outcome.rewritten, 1);
    assert_eq!(outcome.frame.len(), frame.len());
    assert_eq!(answer_addresses(dns_payload(&outcome.frame)), vec![addr(77)]);
    assert!(checksums_valid(&outcome.frame));
}

#[test]
fn test_multiple_answers_mixed_known_and_unknown() {
    let table = table();
    let frame = dns_frame(&dns_response("pool.example.", &[addr(4), addr(200), addr(2)]));

    let outcome = DnsRewriter::new().rewrite(&frame, &table.snapshot()).unwrap();

    assert_eq!(outcome.rewritten, 2);
    assert_eq!(outcome.unknown, vec![addr(200)]);
    assert_eq!(
        answer_addresses(dns_payload(&outcome.frame)),
        vec![addr(91), addr(200), addr(77)]
    );
    assert!(checksums_valid(&outcome.frame));
}

#[test]
fn test_vlan_tagged_frame() {
    let table = table();
    let frame = udp_frame(&dns_response("h2.example.", &[addr(2)]), 53, 0, Some(42));

    let outcome = DnsRewriter::new().rewrite(&frame, &table.snapshot()).unwrap();

    assert_eq!(answer_addresses(dns_payload(&outcome.frame)), vec![addr(77)]);
    assert!(checksums_valid(&outcome.frame));
}

/// Hand-built response whose answer name is a pointer into the question,
/// followed by a second answer with an uncompressed name
#[test]
fn test_compressed_pointer_into_question() {
    let mut dns = vec![0x00, 0x07, 0x81, 0x80, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00];
    // Question at offset 12: h2.example. A IN
    dns.extend_from_slice(b"\x02h2\x07example\x00\x00\x01\x00\x01");
    // Answer 1: pointer to offset 12
    dns.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x04]);
    dns.extend_from_slice(&[10, 0, 0, 2]);
    // Answer 2: label "h4" followed by a pointer to "example." at offset 15
    dns.extend_from_slice(b"\x02h4\xC0\x0F");
    dns.extend_from_slice(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x04]);
    dns.extend_from_slice(&[10, 0, 0, 4]);

    let table = table();
    let frame = dns_frame(&dns);
    let outcome = DnsRewriter::new().rewrite(&frame, &table.snapshot()).unwrap();

    assert_eq!(outcome.rewritten, 2);
    let payload = dns_payload(&outcome.frame);
    assert_eq!(&payload[40..44], &[10, 0, 0, 77]);
    assert_eq!(&payload[payload.len() - 4..], &[10, 0, 0, 91]);
    assert!(checksums_valid(&outcome.frame));
}

#[test]
fn test_truncated_frame_is_not_rewritten() {
    let table = table();
    let frame = dns_frame(&dns_response("h2.example.", &[addr(2)]));
    let rewriter = DnsRewriter::new();

    for cut in [1, 3, 10, 20] {
        let truncated = &frame[..frame.len() - cut];
        assert!(matches!(
            rewriter.rewrite(truncated, &table.snapshot()),
            Err(PacketError::Truncated { .. })
        ));
    }
    assert_eq!(rewriter.stats().snapshot().malformed, 4);
}

#[test]
fn test_controller_floods_rewritten_response() {
    let controller = controller();
    let frame = dns_frame(&dns_response("h2.example.", &[addr(2)]));

    let disposition = controller.on_packet_arrived(SwitchId(1), PacketMetadata::new(3), &frame);

    let PacketDisposition::Emit(out) = disposition else {
        panic!("expected a packet-out");
    };
    assert_eq!(out.in_port, 3);
    assert_eq!(out.actions, vec![FlowAction::Flood]);
    assert_eq!(answer_addresses(dns_payload(&out.data)), vec![addr(77)]);
    assert_eq!(out.data[15] >> 2, 10);
    assert!(checksums_valid(&out.data));
}

#[test]
fn test_rewritten_frame_is_not_intercepted_again() {
    let controller = controller();
    let frame = dns_frame(&dns_response("h2.example.", &[addr(2)]));
    let PacketDisposition::Emit(out) =
        controller.on_packet_arrived(SwitchId(1), PacketMetadata::new(3), &frame)
    else {
        panic!("expected a packet-out");
    };

    // The flooded copy comes back through another switch
    let disposition = controller.on_packet_arrived(SwitchId(2), PacketMetadata::new(1), &out.data);
    assert_eq!(disposition, PacketDisposition::NoAction);
    assert_eq!(controller.rewriter().stats().snapshot().packets, 1);
}

#[test]
fn test_other_resolver_and_port_ignored() {
    let controller = controller();
    let dns = dns_response("h2.example.", &[addr(2)]);

    let other_port = udp_frame(&dns, 5353, 0, None);
    assert_eq!(
        controller.on_packet_arrived(SwitchId(1), PacketMetadata::new(1), &other_port),
        PacketDisposition::NoAction
    );

    // Matched-rule hint forces the DNS path
    let disposition = controller.on_packet_arrived(
        SwitchId(1),
        PacketMetadata::new(1).with_rule_priority(DNS_RULE_PRIORITY),
        &other_port,
    );
    assert!(disposition.packet_out().is_some());
}

#[test]
fn test_query_is_dropped() {
    let controller = controller();
    let mut dns = dns_response("h2.example.", &[]);
    // Clear QR
    dns[2] &= 0x7F;
    let frame = dns_frame(&dns);

    assert_eq!(
        controller.on_packet_arrived(SwitchId(1), PacketMetadata::new(1), &frame),
        PacketDisposition::NoAction
    );
    assert_eq!(controller.rewriter().stats().snapshot().malformed, 1);
}
