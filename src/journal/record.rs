//! Journal record layout and codec
//!
//! Every record starts with a 24-byte common header:
//! - Magic (u32 LE): identifies the record type
//! - Version (u16 LE)
//! - Flags (u16 LE): bit0 transient, bit1 external
//! - Serial (u64 LE): journal instance serial
//! - Record id (u64 LE)
//!
//! followed by a type-specific fixed part, the xid bytes, the payload and a
//! 24-byte tail:
//! - Inverted magic (u32 LE)
//! - CRC32 over header through payload (u32 LE)
//! - Serial (u64 LE)
//! - Record id (u64 LE)
//!
//! Encoded records are zero padded to a dblk multiple. The file header is a
//! special record that always fills exactly one sblk.

use super::checksum::compute_checksum;
use super::errors::{JournalError, JournalResult};

/// Data block: record size and alignment unit in bytes
pub const DBLK_SIZE: usize = 128;
/// Dblks per sblk
pub const SBLK_DBLKS: usize = 32;
/// Disk write block in bytes; pages, files and page write offsets align to it
pub const SBLK_SIZE: usize = DBLK_SIZE * SBLK_DBLKS;

/// On-disk format version
pub const RECORD_VERSION: u16 = 2;

/// Size of the common record header
pub const REC_HDR_SIZE: usize = 24;
/// Size of the record tail
pub const REC_TAIL_SIZE: usize = 24;
/// Size of the file header record (one sblk)
pub const FILE_HEADER_SIZE: usize = SBLK_SIZE;

const ENQ_FIXED_SIZE: usize = REC_HDR_SIZE + 16;
const DEQ_FIXED_SIZE: usize = REC_HDR_SIZE + 16;
const TXN_FIXED_SIZE: usize = REC_HDR_SIZE + 8;
const FHDR_FIXED_SIZE: usize = REC_HDR_SIZE + 32;

pub const ENQ_MAGIC: u32 = u32::from_le_bytes(*b"QLSe");
pub const DEQ_MAGIC: u32 = u32::from_le_bytes(*b"QLSd");
pub const ABORT_MAGIC: u32 = u32::from_le_bytes(*b"QLSa");
pub const COMMIT_MAGIC: u32 = u32::from_le_bytes(*b"QLSc");
pub const FHDR_MAGIC: u32 = u32::from_le_bytes(*b"QLSf");
pub const FILLER_MAGIC: u32 = u32::from_le_bytes(*b"QLSx");

/// Record flag: message does not survive a broker restart
pub const FLAG_TRANSIENT: u16 = 0x0001;
/// Record flag: payload is stored outside the journal
pub const FLAG_EXTERNAL: u16 = 0x0002;

/// Rounds a byte count up to whole dblks, returning the dblk count
pub fn size_dblks(bytes: usize) -> usize {
    (bytes + DBLK_SIZE - 1) / DBLK_SIZE
}

/// Rounds a byte count up to whole sblks, returning the sblk count
pub fn size_sblks(bytes: usize) -> usize {
    (bytes + SBLK_SIZE - 1) / SBLK_SIZE
}

/// Record kinds distinguished by header magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Enqueue,
    Dequeue,
    Abort,
    Commit,
    FileHeader,
    Filler,
}

impl RecordType {
    /// Header magic for this record type
    pub fn magic(self) -> u32 {
        match self {
            RecordType::Enqueue => ENQ_MAGIC,
            RecordType::Dequeue => DEQ_MAGIC,
            RecordType::Abort => ABORT_MAGIC,
            RecordType::Commit => COMMIT_MAGIC,
            RecordType::FileHeader => FHDR_MAGIC,
            RecordType::Filler => FILLER_MAGIC,
        }
    }

    /// Maps a header magic back to its record type
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            ENQ_MAGIC => Some(RecordType::Enqueue),
            DEQ_MAGIC => Some(RecordType::Dequeue),
            ABORT_MAGIC => Some(RecordType::Abort),
            COMMIT_MAGIC => Some(RecordType::Commit),
            FHDR_MAGIC => Some(RecordType::FileHeader),
            FILLER_MAGIC => Some(RecordType::Filler),
            _ => None,
        }
    }
}

/// Common header shared by every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub version: u16,
    pub flags: u16,
    pub serial: u64,
    pub rid: u64,
}

impl RecordHeader {
    pub fn new(record_type: RecordType, flags: u16, serial: u64, rid: u64) -> Self {
        Self {
            record_type,
            version: RECORD_VERSION,
            flags,
            serial,
            rid,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.record_type.magic().to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.serial.to_le_bytes());
        buf.extend_from_slice(&self.rid.to_le_bytes());
    }

    /// Decodes and validates the common header at the start of `buf`.
    pub fn decode(buf: &[u8]) -> JournalResult<Self> {
        if buf.len() < REC_HDR_SIZE {
            return Err(JournalError::malformed(format!(
                "record header truncated: {} bytes available",
                buf.len()
            )));
        }
        let magic = le_u32(buf, 0);
        let record_type = RecordType::from_magic(magic).ok_or_else(|| {
            JournalError::malformed(format!("unknown record magic 0x{:08x}", magic))
        })?;
        let version = le_u16(buf, 4);
        if version != RECORD_VERSION {
            return Err(JournalError::malformed(format!(
                "unsupported record version {}",
                version
            )));
        }
        Ok(Self {
            record_type,
            version,
            flags: le_u16(buf, 6),
            serial: le_u64(buf, 8),
            rid: le_u64(buf, 16),
        })
    }

    pub fn is_transient(&self) -> bool {
        self.flags & FLAG_TRANSIENT != 0
    }

    pub fn is_external(&self) -> bool {
        self.flags & FLAG_EXTERNAL != 0
    }
}

/// Enqueue of one message, optionally inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRecord {
    pub serial: u64,
    pub rid: u64,
    pub transient: bool,
    pub external: bool,
    pub xid: Vec<u8>,
    /// Payload bytes; empty for external records
    pub data: Vec<u8>,
    /// Logical payload size, recorded even when the payload is external
    pub data_size: u64,
}

impl EnqueueRecord {
    /// Enqueue carrying its payload in the journal
    pub fn new(serial: u64, rid: u64, xid: &[u8], data: &[u8], transient: bool) -> Self {
        Self {
            serial,
            rid,
            transient,
            external: false,
            xid: xid.to_vec(),
            data: data.to_vec(),
            data_size: data.len() as u64,
        }
    }

    /// Enqueue whose payload lives outside the journal
    pub fn external(serial: u64, rid: u64, xid: &[u8], data_size: u64, transient: bool) -> Self {
        Self {
            serial,
            rid,
            transient,
            external: true,
            xid: xid.to_vec(),
            data: Vec::new(),
            data_size,
        }
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.transient {
            flags |= FLAG_TRANSIENT;
        }
        if self.external {
            flags |= FLAG_EXTERNAL;
        }
        flags
    }

    /// Unpadded encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        Self::encoded_len_for(self.xid.len(), self.data.len())
    }

    /// Unpadded encoded size for the given xid and stored payload sizes
    pub fn encoded_len_for(xid_len: usize, stored_data_len: usize) -> usize {
        ENQ_FIXED_SIZE + xid_len + stored_data_len + REC_TAIL_SIZE
    }

    /// Encoded size in dblks
    pub fn size_dblks(&self) -> usize {
        size_dblks(self.encoded_len())
    }

    /// Encodes the record, zero padded to a dblk multiple
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_dblks() * DBLK_SIZE);
        RecordHeader::new(RecordType::Enqueue, self.flags(), self.serial, self.rid)
            .write_to(&mut buf);
        buf.extend_from_slice(&(self.xid.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.data_size.to_le_bytes());
        buf.extend_from_slice(&self.xid);
        buf.extend_from_slice(&self.data);
        seal(buf, ENQ_MAGIC, self.serial, self.rid)
    }

    fn decode_body(header: RecordHeader, buf: &[u8]) -> JournalResult<(Self, usize)> {
        if buf.len() < ENQ_FIXED_SIZE {
            return Err(JournalError::malformed("enqueue header truncated"));
        }
        let xid_len = to_len(le_u64(buf, REC_HDR_SIZE), "xid size")?;
        let data_size = le_u64(buf, REC_HDR_SIZE + 8);
        let stored = if header.is_external() {
            0
        } else {
            to_len(data_size, "data size")?
        };
        let body_end = ENQ_FIXED_SIZE
            .checked_add(xid_len)
            .and_then(|n| n.checked_add(stored))
            .ok_or_else(|| JournalError::malformed("enqueue sizes overflow"))?;
        check_tail(buf, body_end, header)?;
        let xid = buf[ENQ_FIXED_SIZE..ENQ_FIXED_SIZE + xid_len].to_vec();
        let data = buf[ENQ_FIXED_SIZE + xid_len..body_end].to_vec();
        let record = Self {
            serial: header.serial,
            rid: header.rid,
            transient: header.is_transient(),
            external: header.is_external(),
            xid,
            data,
            data_size,
        };
        Ok((record, size_dblks(body_end + REC_TAIL_SIZE) * DBLK_SIZE))
    }
}

/// Dequeue of a previously enqueued record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeueRecord {
    pub serial: u64,
    pub rid: u64,
    pub dequeued_rid: u64,
    pub xid: Vec<u8>,
}

impl DequeueRecord {
    pub fn new(serial: u64, rid: u64, dequeued_rid: u64, xid: &[u8]) -> Self {
        Self {
            serial,
            rid,
            dequeued_rid,
            xid: xid.to_vec(),
        }
    }

    /// Unpadded encoded size for the given xid size
    pub fn encoded_len_for(xid_len: usize) -> usize {
        DEQ_FIXED_SIZE + xid_len + REC_TAIL_SIZE
    }

    pub fn size_dblks(&self) -> usize {
        size_dblks(Self::encoded_len_for(self.xid.len()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_dblks() * DBLK_SIZE);
        RecordHeader::new(RecordType::Dequeue, 0, self.serial, self.rid).write_to(&mut buf);
        buf.extend_from_slice(&self.dequeued_rid.to_le_bytes());
        buf.extend_from_slice(&(self.xid.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.xid);
        seal(buf, DEQ_MAGIC, self.serial, self.rid)
    }

    fn decode_body(header: RecordHeader, buf: &[u8]) -> JournalResult<(Self, usize)> {
        if buf.len() < DEQ_FIXED_SIZE {
            return Err(JournalError::malformed("dequeue header truncated"));
        }
        let dequeued_rid = le_u64(buf, REC_HDR_SIZE);
        let xid_len = to_len(le_u64(buf, REC_HDR_SIZE + 8), "xid size")?;
        let body_end = DEQ_FIXED_SIZE
            .checked_add(xid_len)
            .ok_or_else(|| JournalError::malformed("dequeue sizes overflow"))?;
        check_tail(buf, body_end, header)?;
        let record = Self {
            serial: header.serial,
            rid: header.rid,
            dequeued_rid,
            xid: buf[DEQ_FIXED_SIZE..body_end].to_vec(),
        };
        Ok((record, size_dblks(body_end + REC_TAIL_SIZE) * DBLK_SIZE))
    }
}

/// Transaction outcome carried by a transaction-control record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnKind {
    Abort,
    Commit,
}

impl TxnKind {
    fn record_type(self) -> RecordType {
        match self {
            TxnKind::Abort => RecordType::Abort,
            TxnKind::Commit => RecordType::Commit,
        }
    }
}

/// Commit or abort of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnRecord {
    pub kind: TxnKind,
    pub serial: u64,
    pub rid: u64,
    pub xid: Vec<u8>,
}

impl TxnRecord {
    pub fn new(kind: TxnKind, serial: u64, rid: u64, xid: &[u8]) -> Self {
        Self {
            kind,
            serial,
            rid,
            xid: xid.to_vec(),
        }
    }

    /// Unpadded encoded size for the given xid size
    pub fn encoded_len_for(xid_len: usize) -> usize {
        TXN_FIXED_SIZE + xid_len + REC_TAIL_SIZE
    }

    pub fn size_dblks(&self) -> usize {
        size_dblks(Self::encoded_len_for(self.xid.len()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let record_type = self.kind.record_type();
        let mut buf = Vec::with_capacity(self.size_dblks() * DBLK_SIZE);
        RecordHeader::new(record_type, 0, self.serial, self.rid).write_to(&mut buf);
        buf.extend_from_slice(&(self.xid.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.xid);
        seal(buf, record_type.magic(), self.serial, self.rid)
    }

    fn decode_body(kind: TxnKind, header: RecordHeader, buf: &[u8]) -> JournalResult<(Self, usize)> {
        if buf.len() < TXN_FIXED_SIZE {
            return Err(JournalError::malformed("transaction header truncated"));
        }
        let xid_len = to_len(le_u64(buf, REC_HDR_SIZE), "xid size")?;
        if xid_len == 0 {
            return Err(JournalError::malformed(
                "transaction record with zero-length xid",
            ));
        }
        let body_end = TXN_FIXED_SIZE
            .checked_add(xid_len)
            .ok_or_else(|| JournalError::malformed("transaction sizes overflow"))?;
        check_tail(buf, body_end, header)?;
        let record = Self {
            kind,
            serial: header.serial,
            rid: header.rid,
            xid: buf[TXN_FIXED_SIZE..body_end].to_vec(),
        };
        Ok((record, size_dblks(body_end + REC_TAIL_SIZE) * DBLK_SIZE))
    }
}

/// Header occupying the first sblk of every journal file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub serial: u64,
    /// Rid of the first record destined for this file
    pub rid: u64,
    /// Physical slot of the file in the ring
    pub fid: u16,
    /// Logical id, advanced on every rotation
    pub lid: u16,
    /// Byte offset of the first record header in this file
    pub first_record_offset: u64,
    pub timestamp_sec: u64,
    pub timestamp_nsec: u32,
}

impl FileHeader {
    /// Builds a header stamped with the current wall clock time
    pub fn new(serial: u64, rid: u64, fid: u16, lid: u16, first_record_offset: u64) -> Self {
        let now = chrono::Utc::now();
        Self {
            serial,
            rid,
            fid,
            lid,
            first_record_offset,
            timestamp_sec: now.timestamp().max(0) as u64,
            timestamp_nsec: now.timestamp_subsec_nanos(),
        }
    }

    /// Encodes the header padded to exactly [`FILE_HEADER_SIZE`] bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FILE_HEADER_SIZE);
        RecordHeader::new(RecordType::FileHeader, 0, self.serial, self.rid).write_to(&mut buf);
        buf.extend_from_slice(&self.fid.to_le_bytes());
        buf.extend_from_slice(&self.lid.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&self.first_record_offset.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_sec.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_nsec.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.resize(FILE_HEADER_SIZE, 0);
        buf
    }

    /// Decodes a file header from the start of a journal file
    pub fn decode(buf: &[u8]) -> JournalResult<Self> {
        let header = RecordHeader::decode(buf)?;
        if header.record_type != RecordType::FileHeader {
            return Err(JournalError::malformed(format!(
                "expected file header, found {:?}",
                header.record_type
            )));
        }
        if buf.len() < FHDR_FIXED_SIZE {
            return Err(JournalError::malformed("file header truncated"));
        }
        Ok(Self {
            serial: header.serial,
            rid: header.rid,
            fid: le_u16(buf, REC_HDR_SIZE),
            lid: le_u16(buf, REC_HDR_SIZE + 2),
            first_record_offset: le_u64(buf, REC_HDR_SIZE + 8),
            timestamp_sec: le_u64(buf, REC_HDR_SIZE + 16),
            timestamp_nsec: le_u32(buf, REC_HDR_SIZE + 24),
        })
    }
}

/// Any data record found in a page or file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Enqueue(EnqueueRecord),
    Dequeue(DequeueRecord),
    Txn(TxnRecord),
}

impl Record {
    pub fn rid(&self) -> u64 {
        match self {
            Record::Enqueue(r) => r.rid,
            Record::Dequeue(r) => r.rid,
            Record::Txn(r) => r.rid,
        }
    }

    /// Encodes the record, zero padded to a dblk multiple
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Record::Enqueue(r) => r.encode(),
            Record::Dequeue(r) => r.encode(),
            Record::Txn(r) => r.encode(),
        }
    }

    /// Decodes the data record at the start of `buf`.
    ///
    /// Returns the record and the padded number of bytes it occupies.
    pub fn decode(buf: &[u8]) -> JournalResult<(Self, usize)> {
        let header = RecordHeader::decode(buf)?;
        match header.record_type {
            RecordType::Enqueue => {
                EnqueueRecord::decode_body(header, buf).map(|(r, n)| (Record::Enqueue(r), n))
            }
            RecordType::Dequeue => {
                DequeueRecord::decode_body(header, buf).map(|(r, n)| (Record::Dequeue(r), n))
            }
            RecordType::Abort => {
                TxnRecord::decode_body(TxnKind::Abort, header, buf).map(|(r, n)| (Record::Txn(r), n))
            }
            RecordType::Commit => {
                TxnRecord::decode_body(TxnKind::Commit, header, buf).map(|(r, n)| (Record::Txn(r), n))
            }
            other => Err(JournalError::malformed(format!(
                "{:?} is not a data record",
                other
            ))),
        }
    }
}

/// Decodes every data record in `buf`, in order.
///
/// Filler dblks and all-zero dblks are skipped, as is a file header found on
/// an sblk boundary. `buf` must start on a dblk boundary.
pub fn decode_records(buf: &[u8]) -> JournalResult<Vec<Record>> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset + DBLK_SIZE <= buf.len() {
        let magic = le_u32(buf, offset);
        if magic == 0 || magic == FILLER_MAGIC {
            offset += DBLK_SIZE;
            continue;
        }
        if magic == FHDR_MAGIC && offset % SBLK_SIZE == 0 {
            offset += FILE_HEADER_SIZE;
            continue;
        }
        let (record, consumed) = Record::decode(&buf[offset..])
            .map_err(|e| JournalError::malformed_at(offset, e.message().to_string()))?;
        records.push(record);
        offset += consumed;
    }
    Ok(records)
}

/// Overwrites `buf` with filler dblks. `buf.len()` must be a dblk multiple.
pub fn write_filler(buf: &mut [u8]) {
    for dblk in buf.chunks_mut(DBLK_SIZE) {
        dblk.fill(0);
        dblk[..4].copy_from_slice(&FILLER_MAGIC.to_le_bytes());
    }
}

/// An encoded record being copied into pages, possibly across several calls
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    bytes: Vec<u8>,
    written: usize,
}

impl EncodedRecord {
    pub fn new(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() % DBLK_SIZE == 0);
        Self { bytes, written: 0 }
    }

    /// Total padded length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn size_dblks(&self) -> usize {
        self.bytes.len() / DBLK_SIZE
    }

    /// Bytes not yet accepted by the page cache
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn advance(&mut self, n: usize) {
        self.written = (self.written + n).min(self.bytes.len());
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.bytes.len()
    }
}

fn seal(mut buf: Vec<u8>, magic: u32, serial: u64, rid: u64) -> Vec<u8> {
    let checksum = compute_checksum(&buf);
    buf.extend_from_slice(&(!magic).to_le_bytes());
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(&serial.to_le_bytes());
    buf.extend_from_slice(&rid.to_le_bytes());
    let padded = size_dblks(buf.len()) * DBLK_SIZE;
    buf.resize(padded, 0);
    buf
}

fn check_tail(buf: &[u8], body_end: usize, header: RecordHeader) -> JournalResult<()> {
    let total = body_end + REC_TAIL_SIZE;
    if buf.len() < total {
        return Err(JournalError::malformed(format!(
            "record length {} exceeds {} bytes available",
            total,
            buf.len()
        )));
    }
    let xmagic = le_u32(buf, body_end);
    if xmagic != !header.record_type.magic() {
        return Err(JournalError::malformed(format!(
            "tail magic mismatch for rid {}",
            header.rid
        )));
    }
    let checksum = le_u32(buf, body_end + 4);
    if compute_checksum(&buf[..body_end]) != checksum {
        return Err(JournalError::malformed(format!(
            "checksum mismatch for rid {}",
            header.rid
        )));
    }
    if le_u64(buf, body_end + 8) != header.serial || le_u64(buf, body_end + 16) != header.rid {
        return Err(JournalError::malformed(format!(
            "tail serial/rid disagree with header for rid {}",
            header.rid
        )));
    }
    Ok(())
}

fn to_len(value: u64, what: &str) -> JournalResult<usize> {
    usize::try_from(value).map_err(|_| JournalError::malformed(format!("{} {} too large", what, value)))
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_record_is_dblk_padded() {
        let rec = EnqueueRecord::new(7, 1, b"", b"hello", false);
        let bytes = rec.encode();
        assert_eq!(bytes.len(), DBLK_SIZE);
        assert_eq!(rec.size_dblks(), 1);
        assert!(bytes[rec.encoded_len()..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_enqueue_decode_restores_fields() {
        let rec = EnqueueRecord::new(7, 42, b"xid-1", &vec![0xab; 300], true);
        let bytes = rec.encode();
        let (decoded, consumed) = Record::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, Record::Enqueue(rec));
    }

    #[test]
    fn test_external_enqueue_stores_no_payload() {
        let rec = EnqueueRecord::external(7, 3, b"", 1_000_000, false);
        let bytes = rec.encode();
        assert_eq!(bytes.len(), DBLK_SIZE);
        let (decoded, _) = Record::decode(&bytes).unwrap();
        match decoded {
            Record::Enqueue(e) => {
                assert!(e.external);
                assert!(e.data.is_empty());
                assert_eq!(e.data_size, 1_000_000);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let bytes = EnqueueRecord::new(7, 1, b"", &vec![1u8; 500], false).encode();
        let err = Record::decode(&bytes[..200]).unwrap_err();
        assert_eq!(err.code(), super::super::errors::JournalErrorCode::MalformedRecord);
    }

    #[test]
    fn test_checksum_mismatch_is_malformed() {
        let mut bytes = DequeueRecord::new(7, 9, 4, b"").encode();
        bytes[REC_HDR_SIZE] ^= 0xff;
        assert!(Record::decode(&bytes).is_err());
    }

    #[test]
    fn test_txn_record_requires_xid() {
        let mut bytes = TxnRecord::new(TxnKind::Commit, 7, 5, b"x").encode();
        // zero the xid size field
        bytes[REC_HDR_SIZE..REC_HDR_SIZE + 8].fill(0);
        let err = Record::decode(&bytes).unwrap_err();
        assert!(err.message().contains("zero-length xid"));
    }

    #[test]
    fn test_file_header_fills_one_sblk() {
        let fhdr = FileHeader::new(7, 11, 2, 5, FILE_HEADER_SIZE as u64);
        let bytes = fhdr.encode();
        assert_eq!(bytes.len(), SBLK_SIZE);
        let decoded = FileHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, fhdr);
    }

    #[test]
    fn test_decode_records_skips_filler_and_zeroes() {
        let a = Record::Enqueue(EnqueueRecord::new(7, 1, b"", b"a", false));
        let b = Record::Txn(TxnRecord::new(TxnKind::Abort, 7, 2, b"tx"));
        let mut buf = a.encode();
        let mut filler = vec![0u8; 2 * DBLK_SIZE];
        write_filler(&mut filler);
        buf.extend_from_slice(&filler);
        buf.extend_from_slice(&b.encode());
        buf.extend_from_slice(&[0u8; DBLK_SIZE]);
        assert_eq!(decode_records(&buf).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_encoded_record_progress() {
        let mut enc = EncodedRecord::new(vec![0u8; 3 * DBLK_SIZE]);
        assert_eq!(enc.size_dblks(), 3);
        enc.advance(DBLK_SIZE);
        assert_eq!(enc.remaining().len(), 2 * DBLK_SIZE);
        enc.advance(10 * DBLK_SIZE);
        assert!(enc.is_complete());
    }

    #[test]
    fn test_size_helpers() {
        assert_eq!(size_dblks(0), 0);
        assert_eq!(size_dblks(1), 1);
        assert_eq!(size_dblks(DBLK_SIZE), 1);
        assert_eq!(size_sblks(SBLK_SIZE + 1), 2);
    }
}
