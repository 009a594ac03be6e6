//! Wire format serialization and deserialization.
//!
//! All layouts are fixed, unpadded and little-endian.
//!
//! ## Beacon (broadcast, exactly 7 bytes)
//!
//! ```text
//! epoch (u16) || metric (u16, Q12.4) || hop_count (u8) || parent (2)
//! ```
//!
//! ## Unicast header (6 bytes, followed by the body)
//!
//! ```text
//! type (u8: Data=0, Report=1) || source (2) || destination (2) || hop_count (u8)
//! ```
//!
//! ## Topology report body
//!
//! ```text
//! count (u8) || count × (address (2) || status (u8: Add=1, Remove=0))
//! ```

use alloc::vec::Vec;
use core::fmt;

use crate::metric::Metric;
use crate::types::{LinkAddr, Status, TopologyDelta, LINK_ADDR_LEN};

/// Encoded beacon length.
pub const BEACON_LEN: usize = 7;

/// Encoded unicast header length.
pub const UNICAST_HEADER_LEN: usize = 6;

/// Encoded length of one topology delta.
pub const DELTA_LEN: usize = LINK_ADDR_LEN + 1;

/// Length of the report count prefix.
const REPORT_COUNT_LEN: usize = 1;

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Frame length does not match the fixed layout.
    InvalidLength,
    /// Unknown unicast packet type.
    InvalidMessageType,
    /// Field value outside its domain.
    InvalidValue,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of frame"),
            DecodeError::InvalidLength => write!(f, "invalid frame length"),
            DecodeError::InvalidMessageType => write!(f, "invalid packet type"),
            DecodeError::InvalidValue => write!(f, "invalid field value"),
        }
    }
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Everything not yet consumed.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_addr(&mut self) -> Result<LinkAddr, DecodeError> {
        let bytes = self.read_bytes(LINK_ADDR_LEN)?;
        Ok(LinkAddr([bytes[0], bytes[1]]))
    }
}

/// Writer for encoding frames.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_addr(&mut self, addr: &LinkAddr) {
        self.write_bytes(addr.as_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

/// Tree-building broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Beacon {
    /// Tree-building round started by the sink.
    pub epoch: u16,
    /// Sender's path metric.
    pub metric: Metric,
    pub hop_count: u8,
    /// Sender's parent, [`LinkAddr::NULL`] when disconnected.
    pub parent: LinkAddr,
}

impl Encode for Beacon {
    fn encode(&self, w: &mut Writer) {
        w.write_u16_le(self.epoch);
        w.write_u16_le(self.metric.raw());
        w.write_u8(self.hop_count);
        w.write_addr(&self.parent);
    }
}

impl Decode for Beacon {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Beacon {
            epoch: r.read_u16_le()?,
            metric: Metric::from_raw(r.read_u16_le()?),
            hop_count: r.read_u8()?,
            parent: r.read_addr()?,
        })
    }
}

/// Unicast packet discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Application payload.
    Data = 0,
    /// Topology report toward the sink.
    Report = 1,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Report),
            _ => Err(DecodeError::InvalidMessageType),
        }
    }
}

/// Header prepended to every unicast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnicastHeader {
    pub packet_type: PacketType,
    /// Originator.
    pub source: LinkAddr,
    /// Final destination.
    pub destination: LinkAddr,
    /// Hops travelled so far.
    pub hop_count: u8,
}

impl Encode for UnicastHeader {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.packet_type as u8);
        w.write_addr(&self.source);
        w.write_addr(&self.destination);
        w.write_u8(self.hop_count);
    }
}

impl Decode for UnicastHeader {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(UnicastHeader {
            packet_type: PacketType::from_u8(r.read_u8()?)?,
            source: r.read_addr()?,
            destination: r.read_addr()?,
            hop_count: r.read_u8()?,
        })
    }
}

/// One fragment of a topology report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyReport {
    pub deltas: Vec<TopologyDelta>,
}

impl Decode for TopologyReport {
    /// Bytes after the announced entries are left unread.
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.read_u8()? as usize;
        if r.remaining() < count * DELTA_LEN {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut deltas = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = r.read_addr()?;
            let status = Status::from_u8(r.read_u8()?).ok_or(DecodeError::InvalidValue)?;
            deltas.push(TopologyDelta { addr, status });
        }
        Ok(TopologyReport { deltas })
    }
}

/// Decoded unicast frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unicast {
    Data {
        header: UnicastHeader,
        payload: Vec<u8>,
    },
    Report {
        header: UnicastHeader,
        report: TopologyReport,
    },
}

impl Unicast {
    pub fn header(&self) -> &UnicastHeader {
        match self {
            Unicast::Data { header, .. } | Unicast::Report { header, .. } => header,
        }
    }

    /// Parse a unicast frame. Report trailers beyond the announced entries are ignored.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let header = UnicastHeader::decode(&mut r)?;
        match header.packet_type {
            PacketType::Data => Ok(Unicast::Data {
                header,
                payload: r.read_rest().to_vec(),
            }),
            PacketType::Report => Ok(Unicast::Report {
                header,
                report: TopologyReport::decode(&mut r)?,
            }),
        }
    }
}

/// Encode a header followed by a raw body.
pub fn encode_unicast(header: &UnicastHeader, body: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(UNICAST_HEADER_LEN + body.len());
    header.encode(&mut w);
    w.write_bytes(body);
    w.finish()
}

/// Encode a report fragment with its unicast header.
pub fn encode_report(header: &UnicastHeader, deltas: &[TopologyDelta]) -> Vec<u8> {
    let mut w = Writer::with_capacity(UNICAST_HEADER_LEN + REPORT_COUNT_LEN + deltas.len() * DELTA_LEN);
    header.encode(&mut w);
    // Callers fragment to at most 255 entries.
    let count = deltas.len().min(u8::MAX as usize);
    w.write_u8(count as u8);
    for delta in &deltas[..count] {
        w.write_addr(&delta.addr);
        w.write_u8(delta.status as u8);
    }
    w.finish()
}

/// Largest number of deltas per report fragment for a payload budget.
///
/// Bounded by the one-byte count field regardless of the byte budget.
pub const fn max_entries_per_fragment(budget: usize) -> usize {
    let available = budget.saturating_sub(UNICAST_HEADER_LEN + REPORT_COUNT_LEN);
    let entries = available / DELTA_LEN;
    if entries > u8::MAX as usize {
        u8::MAX as usize
    } else {
        entries
    }
}
