//! Wire format for log records.
//!
//! Header is a fixed 20 bytes, little-endian, five 32-bit fields:
//! `size, lsn, txn_id, prev_lsn, type`. This mirrors the original engine's
//! `lsn_t`/`txn_id_t` both being 32-bit; a literal reading of "lsn: i64"
//! would not fit a 20-byte header alongside the other four fields, so the
//! 32-bit width is the one actually load-bearing here (see DESIGN.md).

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 20;
pub const INVALID_LSN: i32 = -1;

/// A logical row identifier: page id + slot index within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: i32,
    pub slot_id: u32,
}

impl Rid {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.page_id.to_le_bytes());
        out.extend_from_slice(&self.slot_id.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<(Rid, &[u8])> {
        if buf.len() < 8 {
            return Err(Error::Corruption("truncated rid".into()));
        }
        let page_id = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let slot_id = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Ok((Rid { page_id, slot_id }, &buf[8..]))
    }
}

fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn decode_bytes(buf: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    if buf.len() < 4 {
        return Err(Error::Corruption("truncated length prefix".into()));
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(Error::Corruption("truncated payload".into()));
    }
    Ok((rest[..len].to_vec(), &rest[len..]))
}

/// The ten record kinds the wire format supports. `Invalid` (0) is never
/// constructed by the engine; it exists so a zeroed/corrupt header is
/// distinguishable from a genuine record during recovery.
#[derive(Debug, Clone)]
pub enum RecordBody {
    Invalid,
    Insert { rid: Rid, tuple: Vec<u8> },
    ApplyDelete { rid: Rid, tuple: Vec<u8> },
    MarkDelete { rid: Rid, tuple: Vec<u8> },
    RollbackDelete { rid: Rid, tuple: Vec<u8> },
    Update { rid: Rid, old_tuple: Vec<u8>, new_tuple: Vec<u8> },
    Begin,
    Commit,
    Abort,
    NewPage { page_id: i32, prev_page_id: i32 },
}

impl RecordBody {
    fn type_code(&self) -> i32 {
        match self {
            RecordBody::Invalid => 0,
            RecordBody::Insert { .. } => 1,
            RecordBody::ApplyDelete { .. } => 2,
            RecordBody::MarkDelete { .. } => 3,
            RecordBody::RollbackDelete { .. } => 4,
            RecordBody::Update { .. } => 5,
            RecordBody::Begin => 6,
            RecordBody::Commit => 7,
            RecordBody::Abort => 8,
            RecordBody::NewPage { .. } => 9,
        }
    }
}

/// A full log record: header fields plus its typed body.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: i32,
    pub txn_id: i32,
    pub prev_lsn: i32,
    pub body: RecordBody,
}

impl LogRecord {
    pub fn new(txn_id: i32, prev_lsn: i32, body: RecordBody) -> Self {
        LogRecord {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            body,
        }
    }

    /// Serializes the record. `size` in the header is the total encoded
    /// length, header included, so a reader can skip unknown-length
    /// payloads without decoding them.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match &self.body {
            RecordBody::Invalid | RecordBody::Begin | RecordBody::Commit | RecordBody::Abort => {}
            RecordBody::Insert { rid, tuple }
            | RecordBody::ApplyDelete { rid, tuple }
            | RecordBody::MarkDelete { rid, tuple }
            | RecordBody::RollbackDelete { rid, tuple } => {
                rid.encode(&mut payload);
                encode_bytes(&mut payload, tuple);
            }
            RecordBody::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                rid.encode(&mut payload);
                encode_bytes(&mut payload, old_tuple);
                encode_bytes(&mut payload, new_tuple);
            }
            RecordBody::NewPage {
                page_id,
                prev_page_id,
            } => {
                payload.extend_from_slice(&page_id.to_le_bytes());
                payload.extend_from_slice(&prev_page_id.to_le_bytes());
            }
        }

        let size = (HEADER_SIZE + payload.len()) as i32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&self.txn_id.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.to_le_bytes());
        out.extend_from_slice(&self.body.type_code().to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Decodes one record starting at `buf[0]`. Returns the record and the
    /// remaining slice, or `None` if `buf` does not contain a complete
    /// record (the caller is at the tail of a partially-flushed buffer).
    pub fn decode(buf: &[u8]) -> Result<Option<(LogRecord, &[u8])>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let size = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        if size < HEADER_SIZE as i32 {
            return Err(Error::Corruption(format!("invalid record size {}", size)));
        }
        if buf.len() < size as usize {
            return Ok(None);
        }
        let lsn = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        let txn_id = i32::from_le_bytes(buf[8..12].try_into().unwrap());
        let prev_lsn = i32::from_le_bytes(buf[12..16].try_into().unwrap());
        let type_code = i32::from_le_bytes(buf[16..20].try_into().unwrap());
        let payload = &buf[HEADER_SIZE..size as usize];

        let body = match type_code {
            0 => RecordBody::Invalid,
            1 | 2 | 3 | 4 => {
                let (rid, rest) = Rid::decode(payload)?;
                let (tuple, _) = decode_bytes(rest)?;
                match type_code {
                    1 => RecordBody::Insert { rid, tuple },
                    2 => RecordBody::ApplyDelete { rid, tuple },
                    3 => RecordBody::MarkDelete { rid, tuple },
                    _ => RecordBody::RollbackDelete { rid, tuple },
                }
            }
            5 => {
                let (rid, rest) = Rid::decode(payload)?;
                let (old_tuple, rest) = decode_bytes(rest)?;
                let (new_tuple, _) = decode_bytes(rest)?;
                RecordBody::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            6 => RecordBody::Begin,
            7 => RecordBody::Commit,
            8 => RecordBody::Abort,
            9 => {
                if payload.len() < 8 {
                    return Err(Error::Corruption("truncated newpage record".into()));
                }
                let page_id = i32::from_le_bytes(payload[0..4].try_into().unwrap());
                let prev_page_id = i32::from_le_bytes(payload[4..8].try_into().unwrap());
                RecordBody::NewPage {
                    page_id,
                    prev_page_id,
                }
            }
            other => return Err(Error::Corruption(format!("unknown record type {}", other))),
        };

        Ok(Some((
            LogRecord {
                lsn,
                txn_id,
                prev_lsn,
                body,
            },
            &buf[size as usize..],
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_record_round_trips() {
        let mut rec = LogRecord::new(
            3,
            INVALID_LSN,
            RecordBody::Insert {
                rid: Rid {
                    page_id: 1,
                    slot_id: 2,
                },
                tuple: vec![1, 2, 3, 4],
            },
        );
        rec.lsn = 7;
        let bytes = rec.encode();
        let (decoded, rest) = LogRecord::decode(&bytes).unwrap().unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded.lsn, 7);
        assert_eq!(decoded.txn_id, 3);
        match decoded.body {
            RecordBody::Insert { rid, tuple } => {
                assert_eq!(rid.page_id, 1);
                assert_eq!(rid.slot_id, 2);
                assert_eq!(tuple, vec![1, 2, 3, 4]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn begin_commit_abort_have_empty_payloads() {
        for body in [RecordBody::Begin, RecordBody::Commit, RecordBody::Abort] {
            let rec = LogRecord::new(1, INVALID_LSN, body);
            let bytes = rec.encode();
            assert_eq!(bytes.len(), HEADER_SIZE);
        }
    }

    #[test]
    fn decode_returns_none_on_truncated_buffer() {
        let rec = LogRecord::new(1, INVALID_LSN, RecordBody::Begin);
        let mut bytes = rec.encode();
        bytes.truncate(HEADER_SIZE - 1);
        assert!(LogRecord::decode(&bytes).unwrap().is_none());
    }

    #[test]
    fn two_records_decode_in_sequence() {
        let a = LogRecord::new(1, INVALID_LSN, RecordBody::Begin).encode();
        let b = LogRecord::new(1, 0, RecordBody::Commit).encode();
        let mut both = a.clone();
        both.extend_from_slice(&b);
        let (first, rest) = LogRecord::decode(&both).unwrap().unwrap();
        assert!(matches!(first.body, RecordBody::Begin));
        let (second, rest) = LogRecord::decode(rest).unwrap().unwrap();
        assert!(matches!(second.body, RecordBody::Commit));
        assert!(rest.is_empty());
    }
}
