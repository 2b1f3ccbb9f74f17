//! Persisted log header.
//!
//! The header records the last committed head. It is written after the
//! tree, data and bitfield of an append, so an interrupted append leaves
//! the previous head in place. Two slots alternate by `seq`; each carries a
//! checksum so a torn slot write is detected and the other slot wins.

use std::sync::Arc;

use reef_store::RandomAccess;
use reef_types::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// Size of one header slot in bytes.
const SLOT_SIZE: u64 = 256;

/// Length prefix + blake3 checksum.
const SLOT_PREFIX: usize = 4 + 32;

/// The committed head of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Header {
    pub seq: u64,
    pub key: PublicKey,
    pub length: u64,
    pub byte_length: u64,
    pub signature_r: [u8; 32],
    pub signature_s: [u8; 32],
}

fn encode_slot(header: &Header) -> Result<Vec<u8>, LogError> {
    let payload = postcard::to_allocvec(header)?;
    let mut slot = Vec::with_capacity(SLOT_SIZE as usize);
    slot.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    slot.extend_from_slice(blake3::hash(&payload).as_bytes());
    slot.extend_from_slice(&payload);

    if slot.len() > SLOT_SIZE as usize {
        return Err(LogError::CorruptHeader(format!(
            "header of {} bytes exceeds slot",
            slot.len()
        )));
    }
    slot.resize(SLOT_SIZE as usize, 0);
    Ok(slot)
}

fn decode_slot(slot: &[u8]) -> Option<Header> {
    if slot.len() < SLOT_PREFIX {
        return None;
    }
    let len = u32::from_be_bytes([slot[0], slot[1], slot[2], slot[3]]) as usize;
    if len == 0 || SLOT_PREFIX + len > slot.len() {
        return None;
    }

    let payload = &slot[SLOT_PREFIX..SLOT_PREFIX + len];
    if blake3::hash(payload).as_bytes() != &slot[4..36] {
        return None;
    }
    postcard::from_bytes(payload).ok()
}

/// Load the newest valid header, if any was ever committed.
pub(crate) async fn load(store: &Arc<dyn RandomAccess>) -> Result<Option<Header>, LogError> {
    let mut newest: Option<Header> = None;

    for slot in 0..2 {
        let Some(bytes) = store.try_read(slot * SLOT_SIZE, SLOT_SIZE).await? else {
            continue;
        };
        if let Some(header) = decode_slot(&bytes)
            && newest.as_ref().is_none_or(|n| header.seq > n.seq)
        {
            newest = Some(header);
        }
    }

    Ok(newest)
}

/// Write `header` into the slot selected by its `seq` and sync.
pub(crate) async fn commit(store: &Arc<dyn RandomAccess>, header: &Header) -> Result<(), LogError> {
    let slot = encode_slot(header)?;
    store.write((header.seq % 2) * SLOT_SIZE, &slot).await?;
    store.sync().await?;
    Ok(())
}
