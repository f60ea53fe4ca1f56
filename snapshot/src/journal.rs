//! Journal codec for persisting the in-memory diff stack across restarts.
//!
//! The journal is a self-delimited stream of records, one per diff layer,
//! ordered disk-adjacent-first so restoration can rebuild parent pointers
//! in a single pass:
//!
//! ```text
//! [varint len][root: 32B][parent_root: 32B]
//! [varint n_accounts] (repeat: [hash 32B][varint blob_len][blob])
//! [varint n_accounts_with_storage] (repeat:
//!     [hash 32B][varint n_slots] (repeat: [hash 32B][varint blob_len][blob]))
//! ```
//!
//! Zero-length blobs encode deletion; absent keys encode "unknown". A
//! record whose payload fails to decode is skippable thanks to the length
//! prefix; a framing failure ends the stream.

use std::io::{self, Read, Write};

use alloy_primitives::B256;

/// Hard ceiling on a single record's payload, guarding replay against a
/// corrupted length prefix.
const MAX_RECORD_SIZE: u64 = 256 * 1024 * 1024;

/// Error type for journal encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The underlying reader or writer failed; the stream cannot continue.
    #[error("journal IO error: {0}")]
    Io(#[from] io::Error),
    /// A record payload ended before its declared contents.
    #[error("journal record truncated")]
    Truncated,
    /// A varint ran past its maximum width.
    #[error("journal varint overflow")]
    VarintOverflow,
    /// A record payload decoded cleanly but left unconsumed bytes.
    #[error("journal record length mismatch: declared {declared}, consumed {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },
    /// A record declared a payload past any sane size.
    #[error("journal record oversized: {0} bytes")]
    Oversized(u64),
}

impl JournalError {
    /// Whether replay may skip this record and keep reading the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Truncated | Self::VarintOverflow | Self::LengthMismatch { .. }
        )
    }
}

/// One journaled diff layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// State root of the journaled layer.
    pub root: B256,
    /// Root of the layer it was stacked on.
    pub parent_root: B256,
    /// Account delta entries, sorted by hash.
    pub accounts: Vec<(B256, Vec<u8>)>,
    /// Storage delta entries, sorted by account hash, slots sorted within.
    pub storage: Vec<(B256, Vec<(B256, Vec<u8>)>)>,
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(byte | 0x80);
        } else {
            buf.push(byte);
            break;
        }
    }
}

fn get_varint(data: &[u8], pos: &mut usize) -> Result<u64, JournalError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos).ok_or(JournalError::Truncated)?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(JournalError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(JournalError::VarintOverflow);
        }
    }
}

fn get_hash(data: &[u8], pos: &mut usize) -> Result<B256, JournalError> {
    let end = pos.checked_add(32).ok_or(JournalError::Truncated)?;
    let bytes = data.get(*pos..end).ok_or(JournalError::Truncated)?;
    *pos = end;
    Ok(B256::from_slice(bytes))
}

fn get_blob(data: &[u8], pos: &mut usize) -> Result<Vec<u8>, JournalError> {
    let len = get_varint(data, pos)? as usize;
    let end = pos.checked_add(len).ok_or(JournalError::Truncated)?;
    let bytes = data.get(*pos..end).ok_or(JournalError::Truncated)?;
    *pos = end;
    Ok(bytes.to_vec())
}

fn encode_payload(record: &JournalRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(record.root.as_slice());
    buf.extend_from_slice(record.parent_root.as_slice());

    put_varint(&mut buf, record.accounts.len() as u64);
    for (hash, blob) in &record.accounts {
        buf.extend_from_slice(hash.as_slice());
        put_varint(&mut buf, blob.len() as u64);
        buf.extend_from_slice(blob);
    }

    put_varint(&mut buf, record.storage.len() as u64);
    for (account_hash, slots) in &record.storage {
        buf.extend_from_slice(account_hash.as_slice());
        put_varint(&mut buf, slots.len() as u64);
        for (slot_hash, blob) in slots {
            buf.extend_from_slice(slot_hash.as_slice());
            put_varint(&mut buf, blob.len() as u64);
            buf.extend_from_slice(blob);
        }
    }
    buf
}

fn decode_payload(data: &[u8]) -> Result<JournalRecord, JournalError> {
    let mut pos = 0usize;
    let root = get_hash(data, &mut pos)?;
    let parent_root = get_hash(data, &mut pos)?;

    let n_accounts = get_varint(data, &mut pos)?;
    let mut accounts = Vec::with_capacity(n_accounts.min(1024) as usize);
    for _ in 0..n_accounts {
        let hash = get_hash(data, &mut pos)?;
        let blob = get_blob(data, &mut pos)?;
        accounts.push((hash, blob));
    }

    let n_storage = get_varint(data, &mut pos)?;
    let mut storage = Vec::with_capacity(n_storage.min(1024) as usize);
    for _ in 0..n_storage {
        let account_hash = get_hash(data, &mut pos)?;
        let n_slots = get_varint(data, &mut pos)?;
        let mut slots = Vec::with_capacity(n_slots.min(1024) as usize);
        for _ in 0..n_slots {
            let slot_hash = get_hash(data, &mut pos)?;
            let blob = get_blob(data, &mut pos)?;
            slots.push((slot_hash, blob));
        }
        storage.push((account_hash, slots));
    }

    if pos != data.len() {
        return Err(JournalError::LengthMismatch { declared: data.len(), consumed: pos });
    }
    Ok(JournalRecord { root, parent_root, accounts, storage })
}

/// Appends one record to the journal stream.
pub fn write_record<W: Write>(writer: &mut W, record: &JournalRecord) -> Result<(), JournalError> {
    let payload = encode_payload(record);
    let mut frame = Vec::with_capacity(payload.len() + 5);
    put_varint(&mut frame, payload.len() as u64);
    frame.extend_from_slice(&payload);
    writer.write_all(&frame)?;
    Ok(())
}

/// Reads the next varint off the stream byte by byte; `None` on a clean
/// end of stream before the first byte.
fn read_varint_stream<R: Read>(reader: &mut R) -> Result<Option<u64>, JournalError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut first = true;
    loop {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof && first => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        first = false;
        let byte = byte[0];
        if shift == 63 && byte > 1 {
            return Err(JournalError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
        if shift > 63 {
            return Err(JournalError::VarintOverflow);
        }
    }
}

/// Reads the next record from the journal stream.
///
/// Returns `Ok(None)` at a clean end of stream. A recoverable decode error
/// (see [`JournalError::is_recoverable`]) leaves the stream positioned at
/// the next record so the caller can skip and continue.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<JournalRecord>, JournalError> {
    let Some(len) = read_varint_stream(reader)? else {
        return Ok(None);
    };
    if len > MAX_RECORD_SIZE {
        return Err(JournalError::Oversized(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    decode_payload(&payload).map(Some)
}
