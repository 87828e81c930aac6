//! Frame builders and independent checksum verification for the
//! integration tests

use std::net::Ipv4Addr;

use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};

/// Resolver address of the lab topology
pub const RESOLVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

/// Client address of the lab topology
pub const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

/// Build a DNS response for `name` answering every address in `answers`
pub fn dns_response(name: &str, answers: &[Ipv4Addr]) -> Vec<u8> {
    let mut message = Message::new();
    message.set_id(0x4d54);
    message.set_recursion_desired(true);
    message.set_recursion_available(true);
    message.set_message_type(MessageType::Response);

    let name = Name::from_ascii(name).expect("valid name");
    message.add_query(Query::query(name.clone(), RecordType::A));
    for address in answers {
        let octets = address.octets();
        message.add_answer(Record::from_rdata(
            name.clone(),
            300,
            RData::A(A::new(octets[0], octets[1], octets[2], octets[3])),
        ));
    }

    message.to_vec().expect("serialize message")
}

/// A records in a DNS message, in answer order
pub fn answer_addresses(dns: &[u8]) -> Vec<Ipv4Addr> {
    let message = Message::from_vec(dns).expect("parse message");
    message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        })
        .collect()
}

fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    for pair in data.chunks(2) {
        let word = if pair.len() == 2 {
            (u32::from(pair[0]) << 8) | u32::from(pair[1])
        } else {
            u32::from(pair[0]) << 8
        };
        sum += word;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

fn pseudo_sum(src: Ipv4Addr, dst: Ipv4Addr, len: usize) -> u32 {
    let mut sum = sum_words(0, &src.octets());
    sum = sum_words(sum, &dst.octets());
    sum + 17 + len as u32
}

/// Wrap `dns` in an Ethernet/IPv4/UDP frame from the resolver to the
/// client with valid checksums. `vlan` inserts an 802.1Q tag.
pub fn udp_frame(dns: &[u8], src_port: u16, dscp: u8, vlan: Option<u16>) -> Vec<u8> {
    let udp_len = 8 + dns.len();
    let total_len = 20 + udp_len;

    let mut frame = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03];
    if let Some(id) = vlan {
        frame.extend_from_slice(&[0x81, 0x00]);
        frame.extend_from_slice(&id.to_be_bytes());
    }
    frame.extend_from_slice(&[0x08, 0x00]);

    let ip_start = frame.len();
    frame.push(0x45);
    frame.push(dscp << 2);
    frame.extend_from_slice(&(total_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, 64, 17, 0, 0]);
    frame.extend_from_slice(&RESOLVER.octets());
    frame.extend_from_slice(&CLIENT.octets());
    let ip_checksum = !fold(sum_words(0, &frame[ip_start..ip_start + 20]));
    frame[ip_start + 10..ip_start + 12].copy_from_slice(&ip_checksum.to_be_bytes());

    let udp_start = frame.len();
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&51000u16.to_be_bytes());
    frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(dns);
    let udp_sum = sum_words(pseudo_sum(RESOLVER, CLIENT, udp_len), &frame[udp_start..]);
    let udp_checksum = match !fold(udp_sum) {
        0 => 0xFFFF,
        c => c,
    };
    frame[udp_start + 6..udp_start + 8].copy_from_slice(&udp_checksum.to_be_bytes());

    frame
}

/// Standard DNS response frame without VLAN tag or DSCP
pub fn dns_frame(dns: &[u8]) -> Vec<u8> {
    udp_frame(dns, 53, 0, None)
}

/// Offset of the IPv4 header in a frame built by [`udp_frame`]
pub fn ip_offset(frame: &[u8]) -> usize {
    if frame[12..14] == [0x81, 0x00] {
        18
    } else {
        14
    }
}

/// DNS payload of a frame built by [`udp_frame`]
pub fn dns_payload(frame: &[u8]) -> &[u8] {
    &frame[ip_offset(frame) + 28..]
}

/// Verify both checksums: each sum, including its checksum field, folds
/// to 0xFFFF
pub fn checksums_valid(frame: &[u8]) -> bool {
    let ip = ip_offset(frame);
    let ip_ok = fold(sum_words(0, &frame[ip..ip + 20])) == 0xFFFF;

    let udp = &frame[ip + 20..];
    let src = Ipv4Addr::new(frame[ip + 12], frame[ip + 13], frame[ip + 14], frame[ip + 15]);
    let dst = Ipv4Addr::new(frame[ip + 16], frame[ip + 17], frame[ip + 18], frame[ip + 19]);
    let udp_ok = fold(sum_words(pseudo_sum(src, dst, udp.len()), udp)) == 0xFFFF;

    ip_ok && udp_ok
}
