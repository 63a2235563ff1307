//! Dropped item id set blob: `count:u16` then `count × itemId:u16`, little-endian.

use std::collections::BTreeSet;

use super::CodecError;
use super::reader::ByteReader;

/// Encode a dropped-item set. Ids are written in ascending order.
pub fn encode_item_ids(ids: &BTreeSet<u16>) -> Result<Vec<u8>, CodecError> {
    let count = u16::try_from(ids.len()).map_err(|_| CodecError::LogTooLarge("dropped item ids"))?;
    let mut out = Vec::with_capacity(2 + ids.len() * 2);
    out.extend_from_slice(&count.to_le_bytes());
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    Ok(out)
}

/// Decode a dropped-item set. An empty blob is the empty set; anything whose
/// length disagrees with its count is malformed.
pub fn decode_item_ids(bytes: &[u8]) -> Result<BTreeSet<u16>, CodecError> {
    if bytes.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut r = ByteReader::new(bytes);
    let count = usize::from(r.u16("dropped item count")?);
    if r.remaining() != count * 2 {
        return Err(r.malformed("dropped item count does not match length"));
    }
    let mut ids = BTreeSet::new();
    for _ in 0..count {
        let _ = ids.insert(r.u16("dropped item id")?);
    }
    Ok(ids)
}
