//! Pack entry headers.

use std::io::Read;

use byteorder::ReadBytesExt;

use super::{PackError, PackResult};
use crate::object::{ObjectId, ObjectKind, OBJECT_ID_LEN};

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// What an entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A complete object.
    Base(ObjectKind),
    /// A delta against the entry at `base_offset` in the same pack.
    OfsDelta { base_offset: u64 },
    /// A delta against the object with id `base_id`.
    RefDelta { base_id: ObjectId },
}

/// Parsed entry header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    /// Entry kind and delta base.
    pub kind: EntryKind,
    /// Inflated size of the body (the delta itself for delta entries).
    pub size: u64,
    /// Bytes consumed by the header, including any delta base reference.
    pub header_len: usize,
}

impl EntryHeader {
    /// Reads an entry header located at `offset`.
    pub fn read<R: Read>(reader: &mut R, offset: u64) -> PackResult<Self> {
        let mut header_len = 1;
        let mut byte = reader.read_u8()?;
        let code = (byte >> 4) & 0x07;
        let mut size = u64::from(byte & 0x0f);
        let mut shift = 4;
        while byte & 0x80 != 0 {
            byte = reader.read_u8()?;
            header_len += 1;
            if shift > 57 {
                return Err(PackError::Truncated(format!(
                    "size varint overflow at offset {}",
                    offset
                )));
            }
            size |= u64::from(byte & 0x7f) << shift;
            shift += 7;
        }

        let kind = match code {
            OFS_DELTA => {
                let (distance, used) = read_offset_distance(reader)?;
                header_len += used;
                let base_offset = offset
                    .checked_sub(distance)
                    .ok_or(PackError::BadBaseOffset(offset))?;
                EntryKind::OfsDelta { base_offset }
            }
            REF_DELTA => {
                let mut id = [0u8; OBJECT_ID_LEN];
                reader.read_exact(&mut id)?;
                header_len += OBJECT_ID_LEN;
                EntryKind::RefDelta {
                    base_id: ObjectId::from_bytes(id),
                }
            }
            other => match ObjectKind::from_pack_code(other) {
                Some(kind) => EntryKind::Base(kind),
                None => return Err(PackError::UnknownEntryType { code: other, offset }),
            },
        };

        Ok(Self {
            kind,
            size,
            header_len,
        })
    }
}

/// Reads the big-endian "offset encoding" used by `OFS_DELTA`.
///
/// Each continuation adds one before shifting, so every distance has exactly
/// one encoding.
fn read_offset_distance<R: Read>(reader: &mut R) -> PackResult<(u64, usize)> {
    let mut byte = reader.read_u8()?;
    let mut used = 1;
    let mut value = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = reader.read_u8()?;
        used += 1;
        value = ((value + 1) << 7) | u64::from(byte & 0x7f);
    }
    Ok((value, used))
}

/// Encodes an entry header. Used by [`super::PackBuilder`].
pub(crate) fn encode_header(code: u8, size: u64, out: &mut Vec<u8>) {
    let mut byte = (code << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest != 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
}

/// Encodes an `OFS_DELTA` distance.
pub(crate) fn encode_offset_distance(mut distance: u64, out: &mut Vec<u8>) {
    let mut bytes = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance != 0 {
        distance -= 1;
        bytes.push(0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    bytes.reverse();
    out.extend_from_slice(&bytes);
}

pub(crate) const OFS_DELTA_CODE: u8 = OFS_DELTA;
pub(crate) const REF_DELTA_CODE: u8 = REF_DELTA;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_small_blob_header() {
        let mut bytes = Vec::new();
        encode_header(3, 11, &mut bytes);
        assert_eq!(bytes, vec![0x3b]);

        let header = EntryHeader::read(&mut Cursor::new(&bytes), 12).unwrap();
        assert_eq!(header.kind, EntryKind::Base(ObjectKind::Blob));
        assert_eq!(header.size, 11);
        assert_eq!(header.header_len, 1);
    }

    #[test]
    fn test_multi_byte_size() {
        let mut bytes = Vec::new();
        encode_header(1, 100_000, &mut bytes);
        let header = EntryHeader::read(&mut Cursor::new(&bytes), 0).unwrap();
        assert_eq!(header.kind, EntryKind::Base(ObjectKind::Commit));
        assert_eq!(header.size, 100_000);
        assert_eq!(header.header_len, bytes.len());
    }

    #[test]
    fn test_offset_distance_roundtrip() {
        for distance in [1u64, 127, 128, 255, 16_511, 16_512, 1 << 30] {
            let mut bytes = Vec::new();
            encode_offset_distance(distance, &mut bytes);
            let (decoded, used) = read_offset_distance(&mut Cursor::new(&bytes)).unwrap();
            assert_eq!(decoded, distance, "distance {}", distance);
            assert_eq!(used, bytes.len());
        }
    }

    #[test]
    fn test_ofs_delta_before_pack_start_is_rejected() {
        let mut bytes = Vec::new();
        encode_header(OFS_DELTA, 4, &mut bytes);
        encode_offset_distance(500, &mut bytes);
        let err = EntryHeader::read(&mut Cursor::new(&bytes), 100).unwrap_err();
        assert!(matches!(err, PackError::BadBaseOffset(100)));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let bytes = vec![0x50];
        let err = EntryHeader::read(&mut Cursor::new(&bytes), 7).unwrap_err();
        assert!(matches!(err, PackError::UnknownEntryType { code: 5, offset: 7 }));
    }
}
