//! Typed, bounds-checked views over Ethernet, IPv4 and UDP headers
//!
//! ```text
//! Ethernet  | dst (6) | src (6) | [0x8100 | TCI (2)] | ethertype (2) |
//! IPv4      | ver/ihl | dscp/ecn | total len | ... | proto | csum | src | dst | [options]
//! UDP       | src port | dst port | length | checksum |
//! ```

use std::net::Ipv4Addr;

use crate::error::PacketError;

/// Ethernet header length without VLAN tag
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Size of one 802.1Q tag
pub const VLAN_TAG_LEN: usize = 4;

/// Minimum IPv4 header length
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// UDP header length
pub const UDP_HEADER_LEN: usize = 8;

/// IPv4 ethertype
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// 802.1Q VLAN ethertype
pub const ETHERTYPE_VLAN: u16 = 0x8100;

/// UDP protocol number
pub const IPPROTO_UDP: u8 = 17;

/// Maximum DSCP value (6-bit field)
pub const DSCP_MAX: u8 = 63;

fn read_u16(data: &[u8], offset: usize, context: &'static str) -> Result<u16, PacketError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| PacketError::truncated(context, offset, 2, data.len().saturating_sub(offset)))
}

/// Ethernet II header, optionally carrying a single VLAN tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    ethertype: u16,
    vlan_id: Option<u16>,
    header_len: usize,
}

impl EthernetHeader {
    /// Parse the Ethernet header at the start of `frame`
    ///
    /// # Errors
    /// Returns `PacketError::Truncated` if the frame is shorter than the header.
    pub fn parse(frame: &[u8]) -> Result<Self, PacketError> {
        if frame.len() < ETHERNET_HEADER_LEN {
            return Err(PacketError::truncated(
                "Ethernet header",
                0,
                ETHERNET_HEADER_LEN,
                frame.len(),
            ));
        }
        let outer = read_u16(frame, 12, "Ethernet header")?;
        if outer != ETHERTYPE_VLAN {
            return Ok(Self {
                ethertype: outer,
                vlan_id: None,
                header_len: ETHERNET_HEADER_LEN,
            });
        }

        let tci = read_u16(frame, 14, "VLAN tag")?;
        let ethertype = read_u16(frame, 16, "VLAN tag")?;
        Ok(Self {
            ethertype,
            vlan_id: Some(tci & 0x0FFF),
            header_len: ETHERNET_HEADER_LEN + VLAN_TAG_LEN,
        })
    }

    /// Inner ethertype (after any VLAN tag)
    #[must_use]
    pub const fn ethertype(&self) -> u16 {
        self.ethertype
    }

    /// VLAN identifier when the frame is tagged
    #[must_use]
    pub const fn vlan_id(&self) -> Option<u16> {
        self.vlan_id
    }

    /// Header length including the VLAN tag
    #[must_use]
    pub const fn len(&self) -> usize {
        self.header_len
    }
}

/// IPv4 header fields needed for rewriting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    header_len: usize,
    total_len: usize,
    tos: u8,
    protocol: u8,
    source: Ipv4Addr,
    destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Parse the IPv4 header at the start of `packet`.
    ///
    /// # Errors
    /// Returns an error if the version is not 4, the IHL is below 5, or the
    /// header or total length runs past the buffer.
    pub fn parse(packet: &[u8]) -> Result<Self, PacketError> {
        if packet.len() < IPV4_MIN_HEADER_LEN {
            return Err(PacketError::truncated(
                "IPv4 header",
                0,
                IPV4_MIN_HEADER_LEN,
                packet.len(),
            ));
        }

        let version = packet[0] >> 4;
        if version != 4 {
            return Err(PacketError::invalid_header(
                "IPv4",
                format!("version {version}"),
            ));
        }

        let header_len = usize::from(packet[0] & 0x0F) * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(PacketError::invalid_header(
                "IPv4",
                format!("header length {header_len}"),
            ));
        }
        if packet.len() < header_len {
            return Err(PacketError::truncated(
                "IPv4 options",
                0,
                header_len,
                packet.len(),
            ));
        }

        let total_len = usize::from(read_u16(packet, 2, "IPv4 header")?);
        if total_len < header_len {
            return Err(PacketError::invalid_header(
                "IPv4",
                format!("total length {total_len} shorter than header {header_len}"),
            ));
        }
        if total_len > packet.len() {
            return Err(PacketError::truncated("IPv4 payload", 0, total_len, packet.len()));
        }

        Ok(Self {
            header_len,
            total_len,
            tos: packet[1],
            protocol: packet[9],
            source: Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]),
            destination: Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]),
        })
    }

    /// Header length in bytes (IHL * 4)
    #[must_use]
    pub const fn header_len(&self) -> usize {
        self.header_len
    }

    /// Total datagram length from the header
    #[must_use]
    pub const fn total_len(&self) -> usize {
        self.total_len
    }

    /// DSCP (upper six bits of the TOS byte)
    #[must_use]
    pub const fn dscp(&self) -> u8 {
        self.tos >> 2
    }

    /// ECN (lower two bits of the TOS byte)
    #[must_use]
    pub const fn ecn(&self) -> u8 {
        self.tos & 0x03
    }

    /// Payload protocol number
    #[must_use]
    pub const fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Source address
    #[must_use]
    pub const fn source(&self) -> Ipv4Addr {
        self.source
    }

    /// Destination address
    #[must_use]
    pub const fn destination(&self) -> Ipv4Addr {
        self.destination
    }
}

/// UDP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    source_port: u16,
    destination_port: u16,
    length: usize,
    checksum: u16,
}

impl UdpHeader {
    /// Parse the UDP header at the start of `segment` (the IPv4 payload).
    ///
    /// # Errors
    /// Returns an error if the header is truncated or its length field does
    /// not fit the IPv4 payload.
    pub fn parse(segment: &[u8]) -> Result<Self, PacketError> {
        if segment.len() < UDP_HEADER_LEN {
            return Err(PacketError::truncated(
                "UDP header",
                0,
                UDP_HEADER_LEN,
                segment.len(),
            ));
        }
        let length = usize::from(read_u16(segment, 4, "UDP header")?);
        if length < UDP_HEADER_LEN || length > segment.len() {
            return Err(PacketError::invalid_header(
                "UDP",
                format!("length {length} with {} bytes available", segment.len()),
            ));
        }
        Ok(Self {
            source_port: read_u16(segment, 0, "UDP header")?,
            destination_port: read_u16(segment, 2, "UDP header")?,
            length,
            checksum: read_u16(segment, 6, "UDP header")?,
        })
    }

    /// Source port
    #[must_use]
    pub const fn source_port(&self) -> u16 {
        self.source_port
    }

    /// Destination port
    #[must_use]
    pub const fn destination_port(&self) -> u16 {
        self.destination_port
    }

    /// Length of header plus payload
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Checksum as received
    #[must_use]
    pub const fn checksum(&self) -> u16 {
        self.checksum
    }
}

/// Byte offsets of an Ethernet/IPv4/UDP frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpFrame {
    /// Link-layer header
    pub ethernet: EthernetHeader,
    /// Network-layer header
    pub ipv4: Ipv4Header,
    /// Transport header
    pub udp: UdpHeader,
    /// Offset of the IPv4 header within the frame
    pub ip_offset: usize,
    /// Offset of the UDP header within the frame
    pub udp_offset: usize,
}

impl UdpFrame {
    /// Parse all three headers of a frame.
    ///
    /// # Errors
    /// Returns `NotIpv4`/`NotUdp` for other traffic and a truncation or
    /// invalid-header error for malformed frames.
    pub fn parse(frame: &[u8]) -> Result<Self, PacketError> {
        let ethernet = EthernetHeader::parse(frame)?;
        if ethernet.ethertype() != ETHERTYPE_IPV4 {
            return Err(PacketError::NotIpv4 {
                ethertype: ethernet.ethertype(),
            });
        }

        let ip_offset = ethernet.len();
        let ipv4 = Ipv4Header::parse(&frame[ip_offset..])?;
        if ipv4.protocol() != IPPROTO_UDP {
            return Err(PacketError::NotUdp {
                protocol: ipv4.protocol(),
            });
        }

        let udp_offset = ip_offset + ipv4.header_len();
        // Trailing Ethernet padding is not part of the datagram
        let udp = UdpHeader::parse(&frame[udp_offset..ip_offset + ipv4.total_len()])?;

        Ok(Self {
            ethernet,
            ipv4,
            udp,
            ip_offset,
            udp_offset,
        })
    }

    /// Offset of the UDP payload
    #[must_use]
    pub const fn payload_offset(&self) -> usize {
        self.udp_offset + UDP_HEADER_LEN
    }

    /// End of the UDP datagram (exclusive)
    #[must_use]
    pub const fn udp_end(&self) -> usize {
        self.udp_offset + self.udp.length()
    }

    /// IPv4 header byte range
    #[must_use]
    pub const fn ip_header_range(&self) -> std::ops::Range<usize> {
        self.ip_offset..self.ip_offset + self.ipv4.header_len()
    }

    /// UDP header plus payload byte range
    #[must_use]
    pub const fn udp_range(&self) -> std::ops::Range<usize> {
        self.udp_offset..self.udp_end()
    }
}

/// Set the DSCP of the IPv4 header at the start of `header`, keeping ECN.
///
/// The checksum is not updated.
pub fn set_dscp(header: &mut [u8], dscp: u8) {
    header[1] = (header[1] & 0x03) | ((dscp & DSCP_MAX) << 2);
}
