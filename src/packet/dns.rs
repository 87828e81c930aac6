//! Cursor-based DNS message walking
//!
//! Only what the rewriter needs: the fixed header, skipping names (label
//! sequences and compression pointers), and resource record framing.
//! Offsets are relative to the start of the DNS message.

use crate::error::PacketError;

/// Fixed DNS header length
pub const DNS_HEADER_LEN: usize = 12;

/// Record type A (IPv4 address)
pub const TYPE_A: u16 = 1;

/// Length of A-record rdata
pub const A_RDATA_LEN: u16 = 4;

/// A 255-byte name holds at most 127 one-character labels
pub const MAX_LABELS: usize = 127;

/// Pointer jumps followed when decoding a name
const MAX_POINTER_JUMPS: usize = 16;

const QR_BIT: u16 = 0x8000;
const POINTER_MASK: u8 = 0xC0;

/// Fixed DNS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    /// Transaction ID
    pub id: u16,
    /// Flags word
    pub flags: u16,
    /// Question count
    pub qdcount: u16,
    /// Answer count
    pub ancount: u16,
    /// Authority count
    pub nscount: u16,
    /// Additional count
    pub arcount: u16,
}

impl DnsHeader {
    /// Parse the header at the start of `message`
    ///
    /// # Errors
    /// Returns `PacketError::Truncated` for messages shorter than 12 bytes.
    pub fn parse(message: &[u8]) -> Result<Self, PacketError> {
        let mut cursor = DnsCursor::new(message, 0);
        Ok(Self {
            id: cursor.read_u16("DNS header")?,
            flags: cursor.read_u16("DNS header")?,
            qdcount: cursor.read_u16("DNS header")?,
            ancount: cursor.read_u16("DNS header")?,
            nscount: cursor.read_u16("DNS header")?,
            arcount: cursor.read_u16("DNS header")?,
        })
    }

    /// Check the QR bit
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.flags & QR_BIT != 0
    }
}

/// Framing of one resource record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Offset of the owner name
    pub name_offset: usize,
    /// Record type
    pub rtype: u16,
    /// Record class
    pub class: u16,
    /// Time to live
    pub ttl: u32,
    /// Offset of the resource data
    pub rdata_offset: usize,
    /// Resource data length
    pub rdlength: u16,
}

/// Bounds-checked read position within a DNS message
#[derive(Debug, Clone)]
pub struct DnsCursor<'a> {
    message: &'a [u8],
    position: usize,
}

impl<'a> DnsCursor<'a> {
    /// Create a cursor at `position`
    #[must_use]
    pub const fn new(message: &'a [u8], position: usize) -> Self {
        Self { message, position }
    }

    /// Current offset
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    fn take(&mut self, count: usize, context: &'static str) -> Result<&'a [u8], PacketError> {
        let bytes = self
            .message
            .get(self.position..self.position + count)
            .ok_or_else(|| {
                PacketError::truncated(
                    context,
                    self.position,
                    count,
                    self.message.len().saturating_sub(self.position),
                )
            })?;
        self.position += count;
        Ok(bytes)
    }

    /// Read one byte
    ///
    /// # Errors
    /// Returns `PacketError::Truncated` at the end of the message.
    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, PacketError> {
        Ok(self.take(1, context)?[0])
    }

    /// Read a big-endian u16
    ///
    /// # Errors
    /// Returns `PacketError::Truncated` if fewer than 2 bytes remain.
    pub fn read_u16(&mut self, context: &'static str) -> Result<u16, PacketError> {
        let b = self.take(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u32
    ///
    /// # Errors
    /// Returns `PacketError::Truncated` if fewer than 4 bytes remain.
    pub fn read_u32(&mut self, context: &'static str) -> Result<u32, PacketError> {
        let b = self.take(4, context)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Advance over `count` bytes
    ///
    /// # Errors
    /// Returns `PacketError::Truncated` if fewer than `count` bytes remain.
    pub fn skip(&mut self, count: usize, context: &'static str) -> Result<(), PacketError> {
        self.take(count, context).map(|_| ())
    }

    /// Advance over an encoded name.
    ///
    /// A name is a run of labels ending in a zero byte, or ending in a
    /// two-byte compression pointer. Pointers are validated but not
    /// followed, since only the name's wire length matters here.
    ///
    /// # Errors
    /// Returns an error for truncated labels, reserved label types, forward
    /// or out-of-range pointers, and names with too many labels.
    pub fn skip_name(&mut self) -> Result<(), PacketError> {
        let start = self.position;
        let mut labels = 0;

        loop {
            let offset = self.position;
            let len = self.read_u8("DNS name")?;
            match len & POINTER_MASK {
                0x00 if len == 0 => return Ok(()),
                0x00 => {
                    labels += 1;
                    if labels > MAX_LABELS {
                        return Err(PacketError::NameTooLong {
                            offset: start,
                            max: MAX_LABELS,
                        });
                    }
                    self.skip(usize::from(len), "DNS label")?;
                }
                POINTER_MASK => {
                    let low = self.read_u8("DNS compression pointer")?;
                    let target = (usize::from(len & !POINTER_MASK) << 8) | usize::from(low);
                    if target >= offset {
                        return Err(PacketError::invalid_header(
                            "DNS",
                            format!("compression pointer at {offset} targets {target}"),
                        ));
                    }
                    return Ok(());
                }
                _ => return Err(PacketError::BadLabel { byte: len, offset }),
            }
        }
    }

    /// Decode the name at the cursor into dotted form, following pointers.
    ///
    /// The cursor ends up just past the name as it appears at the current
    /// position.
    ///
    /// # Errors
    /// Same conditions as [`skip_name`](Self::skip_name), plus pointer loops.
    pub fn read_name(&mut self) -> Result<String, PacketError> {
        let start = self.position;
        let mut name = String::new();
        let mut reader = self.clone();
        let mut resume = None;
        let mut jumps = 0;
        let mut labels = 0;

        loop {
            let offset = reader.position;
            let len = reader.read_u8("DNS name")?;
            match len & POINTER_MASK {
                0x00 if len == 0 => break,
                0x00 => {
                    labels += 1;
                    if labels > MAX_LABELS {
                        return Err(PacketError::NameTooLong {
                            offset: start,
                            max: MAX_LABELS,
                        });
                    }
                    let label = reader.take(usize::from(len), "DNS label")?;
                    name.push_str(&String::from_utf8_lossy(label));
                    name.push('.');
                }
                POINTER_MASK => {
                    let low = reader.read_u8("DNS compression pointer")?;
                    let target = (usize::from(len & !POINTER_MASK) << 8) | usize::from(low);
                    jumps += 1;
                    if target >= offset || jumps > MAX_POINTER_JUMPS {
                        return Err(PacketError::invalid_header(
                            "DNS",
                            format!("compression pointer at {offset} targets {target}"),
                        ));
                    }
                    resume.get_or_insert(reader.position);
                    reader.position = target;
                }
                _ => return Err(PacketError::BadLabel { byte: len, offset }),
            }
        }

        self.position = resume.unwrap_or(reader.position);
        if name.is_empty() {
            name.push('.');
        }
        Ok(name)
    }

    /// Skip one question entry (name, type, class)
    ///
    /// # Errors
    /// Returns an error if the name is malformed or the entry is truncated.
    pub fn skip_question(&mut self) -> Result<(), PacketError> {
        self.skip_name()?;
        self.skip(4, "DNS question")
    }

    /// Read the framing of one resource record and advance past its rdata
    ///
    /// # Errors
    /// Returns an error if the name is malformed or the record is truncated.
    pub fn read_record(&mut self) -> Result<ResourceRecord, PacketError> {
        let name_offset = self.position;
        self.skip_name()?;
        let rtype = self.read_u16("DNS record")?;
        let class = self.read_u16("DNS record")?;
        let ttl = self.read_u32("DNS record")?;
        let rdlength = self.read_u16("DNS record")?;
        let rdata_offset = self.position;
        self.skip(usize::from(rdlength), "DNS rdata")?;

        Ok(ResourceRecord {
            name_offset,
            rtype,
            class,
            ttl,
            rdata_offset,
            rdlength,
        })
    }
}
