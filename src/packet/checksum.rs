//! Internet checksum (RFC 1071) helpers for IPv4 headers and UDP datagrams

use std::net::Ipv4Addr;

use super::headers::IPPROTO_UDP;

/// Offset of the checksum field inside an IPv4 header
pub const IPV4_CHECKSUM_OFFSET: usize = 10;

/// Offset of the checksum field inside a UDP header
pub const UDP_CHECKSUM_OFFSET: usize = 6;

/// Add the 16-bit big-endian words of `data` to `sum`.
///
/// An odd trailing byte is padded with zero.
#[must_use]
pub fn ones_complement_add(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([*last, 0])));
    }
    sum
}

/// Fold a 32-bit accumulator down to 16 bits with end-around carry
#[must_use]
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    // Loop guarantees the value fits
    sum as u16
}

/// Compute the IPv4 header checksum, treating the checksum field as zero
#[must_use]
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let end = header.len().min(IPV4_CHECKSUM_OFFSET);
    let mut sum = ones_complement_add(0, &header[..end]);
    if header.len() > IPV4_CHECKSUM_OFFSET + 2 {
        sum = ones_complement_add(sum, &header[IPV4_CHECKSUM_OFFSET + 2..]);
    }
    !fold(sum)
}

/// Recompute and store the checksum of an IPv4 header in place
pub fn recalc_ipv4_checksum(header: &mut [u8]) {
    let checksum = ipv4_header_checksum(header);
    header[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
}

/// Check an IPv4 header: the sum of all words must be 0xFFFF
#[must_use]
pub fn verify_ipv4_header(header: &[u8]) -> bool {
    fold(ones_complement_add(0, header)) == 0xFFFF
}

fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, udp_len: usize) -> u32 {
    let mut sum = ones_complement_add(0, &src.octets());
    sum = ones_complement_add(sum, &dst.octets());
    sum = sum.wrapping_add(u32::from(IPPROTO_UDP));
    // UDP length fits in 16 bits on the wire
    sum.wrapping_add(udp_len as u32 & 0xFFFF)
}

/// Compute the UDP checksum over the pseudo-header and `segment`
/// (UDP header plus payload), treating the checksum field as zero.
///
/// A computed zero is transmitted as 0xFFFF since zero means "no checksum".
#[must_use]
pub fn udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut sum = pseudo_header_sum(src, dst, segment.len());
    let end = segment.len().min(UDP_CHECKSUM_OFFSET);
    sum = ones_complement_add(sum, &segment[..end]);
    if segment.len() > UDP_CHECKSUM_OFFSET + 2 {
        sum = ones_complement_add(sum, &segment[UDP_CHECKSUM_OFFSET + 2..]);
    }
    match !fold(sum) {
        0 => 0xFFFF,
        checksum => checksum,
    }
}

/// Recompute and store the UDP checksum of `segment` in place
pub fn recalc_udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &mut [u8]) {
    let checksum = udp_checksum(src, dst, segment);
    segment[UDP_CHECKSUM_OFFSET..UDP_CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
}

/// Check a UDP datagram against its pseudo-header.
///
/// A zero checksum field means the sender did not compute one and is
/// accepted.
#[must_use]
pub fn verify_udp(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> bool {
    if segment.len() < UDP_CHECKSUM_OFFSET + 2 {
        return false;
    }
    if segment[UDP_CHECKSUM_OFFSET..UDP_CHECKSUM_OFFSET + 2] == [0, 0] {
        return true;
    }
    let sum = ones_complement_add(pseudo_header_sum(src, dst, segment.len()), segment);
    fold(sum) == 0xFFFF
}
