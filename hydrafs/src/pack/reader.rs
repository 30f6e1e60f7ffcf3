//! Pack parsing, verification, and single-object reads.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::bufread::ZlibDecoder;
use sha1::{Digest, Sha1};

use super::delta::apply_delta;
use super::entry::{EntryHeader, EntryKind};
use super::index::{IndexEntry, PackIndex};
use super::{
    PackError, PackResult, MAX_DELTA_DEPTH, PACK_HEADER_LEN, PACK_SIGNATURE, PACK_TRAILER_LEN,
};
use crate::object::{ObjectId, ObjectKind};

/// A fully resolved object body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

struct RawEntry {
    offset: u64,
    kind: EntryKind,
    data: Vec<u8>,
}

fn read_pack_header(pack: &[u8]) -> PackResult<u32> {
    if pack.len() < PACK_HEADER_LEN + PACK_TRAILER_LEN {
        return Err(PackError::Truncated(format!(
            "{} bytes is shorter than header and trailer",
            pack.len()
        )));
    }
    if &pack[..4] != PACK_SIGNATURE {
        return Err(PackError::BadSignature);
    }
    let mut cursor = Cursor::new(&pack[4..PACK_HEADER_LEN]);
    let version = cursor.read_u32::<BigEndian>()?;
    if version != 2 && version != 3 {
        return Err(PackError::UnsupportedVersion(version));
    }
    Ok(cursor.read_u32::<BigEndian>()?)
}

fn verify_trailer(pack: &[u8]) -> PackResult<ObjectId> {
    let split = pack.len() - PACK_TRAILER_LEN;
    let computed: [u8; 20] = Sha1::digest(&pack[..split]).into();
    let expected = &pack[split..];
    if computed[..] != *expected {
        return Err(PackError::ChecksumMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(computed),
        });
    }
    Ok(ObjectId::from_bytes(computed))
}

fn inflate<R: std::io::BufRead>(reader: R, size: u64, offset: u64) -> PackResult<(Vec<u8>, u64)> {
    let mut decoder = ZlibDecoder::new(reader);
    let mut data = Vec::with_capacity(size.min(1 << 26) as usize);
    (&mut decoder)
        .take(size + 1)
        .read_to_end(&mut data)
        .map_err(|e| PackError::Inflate {
            offset,
            reason: e.to_string(),
        })?;
    if data.len() as u64 != size {
        return Err(PackError::Inflate {
            offset,
            reason: format!("expected {} bytes, inflated {}", size, data.len()),
        });
    }
    Ok((data, decoder.total_in()))
}

fn parse_entries(pack: &[u8], count: u32) -> PackResult<Vec<RawEntry>> {
    let end = pack.len() - PACK_TRAILER_LEN;
    let mut pos = PACK_HEADER_LEN;
    let mut entries = Vec::with_capacity(count as usize);

    for _ in 0..count {
        if pos >= end {
            return Err(PackError::Truncated(format!(
                "expected {} entries, found {}",
                count,
                entries.len()
            )));
        }
        let offset = pos as u64;
        let header = EntryHeader::read(&mut Cursor::new(&pack[pos..end]), offset)?;
        let body_start = pos + header.header_len;
        if body_start > end {
            return Err(PackError::Truncated(format!("entry header at {}", offset)));
        }
        let (data, consumed) = inflate(&pack[body_start..end], header.size, offset)?;
        entries.push(RawEntry {
            offset,
            kind: header.kind,
            data,
        });
        pos = body_start + consumed as usize;
    }

    if pos != end {
        return Err(PackError::Truncated(format!(
            "{} unexpected bytes before trailer",
            end.saturating_sub(pos)
        )));
    }
    Ok(entries)
}

/// Parses and verifies a pack held in memory and builds its index.
///
/// Every delta is resolved and every object id is recomputed from the
/// resolved body. `resolve_external` supplies bases of `REF_DELTA` entries
/// that are not in the pack itself.
pub fn index_pack<F>(pack: &[u8], resolve_external: F) -> PackResult<PackIndex>
where
    F: Fn(&ObjectId) -> Option<ResolvedObject>,
{
    let count = read_pack_header(pack)?;
    let checksum = verify_trailer(pack)?;
    let raw = parse_entries(pack, count)?;

    let by_offset: HashMap<u64, usize> = raw.iter().enumerate().map(|(i, e)| (e.offset, i)).collect();
    let mut resolved: Vec<Option<(ObjectKind, Vec<u8>)>> = vec![None; raw.len()];
    let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
    let mut external: HashMap<ObjectId, ResolvedObject> = HashMap::new();
    let mut remaining = raw.len();
    let mut allow_external = false;

    while remaining > 0 {
        let mut progress = false;

        for (i, entry) in raw.iter().enumerate() {
            if resolved[i].is_some() {
                continue;
            }
            let result = match entry.kind {
                EntryKind::Base(kind) => Some((kind, entry.data.clone())),
                EntryKind::OfsDelta { base_offset } => {
                    let base_idx = *by_offset
                        .get(&base_offset)
                        .ok_or(PackError::BadBaseOffset(entry.offset))?;
                    match &resolved[base_idx] {
                        Some((kind, base)) => Some((*kind, apply(base, &entry.data, entry.offset)?)),
                        None => None,
                    }
                }
                EntryKind::RefDelta { base_id } => {
                    if let Some(&base_idx) = by_id.get(&base_id) {
                        match &resolved[base_idx] {
                            Some((kind, base)) => {
                                Some((*kind, apply(base, &entry.data, entry.offset)?))
                            }
                            None => None,
                        }
                    } else if allow_external {
                        if !external.contains_key(&base_id) {
                            let base = resolve_external(&base_id)
                                .ok_or(PackError::UnresolvedBase(base_id))?;
                            external.insert(base_id, base);
                        }
                        let base = &external[&base_id];
                        Some((base.kind, apply(&base.data, &entry.data, entry.offset)?))
                    } else {
                        None
                    }
                }
            };

            if let Some((kind, body)) = result {
                by_id.insert(ObjectId::hash_object(kind, &body), i);
                resolved[i] = Some((kind, body));
                remaining -= 1;
                progress = true;
            }
        }

        if !progress {
            if allow_external {
                // Only unreachable offset chains can remain here.
                let stuck = raw
                    .iter()
                    .zip(&resolved)
                    .find(|(_, r)| r.is_none())
                    .map(|(e, _)| e.offset)
                    .unwrap_or_default();
                return Err(PackError::BadBaseOffset(stuck));
            }
            allow_external = true;
        }
    }

    let entries = raw
        .iter()
        .zip(resolved)
        .filter_map(|(entry, r)| {
            r.map(|(kind, body)| IndexEntry {
                id: ObjectId::hash_object(kind, &body),
                offset: entry.offset,
                kind,
                size: body.len() as u64,
            })
        })
        .collect();

    Ok(PackIndex::new(checksum, entries))
}

/// Reads a pack file from disk and builds its index.
pub fn index_pack_file<F>(path: &Path, resolve_external: F) -> PackResult<PackIndex>
where
    F: Fn(&ObjectId) -> Option<ResolvedObject>,
{
    let bytes = std::fs::read(path)?;
    index_pack(&bytes, resolve_external)
}

fn apply(base: &[u8], delta: &[u8], offset: u64) -> PackResult<Vec<u8>> {
    apply_delta(base, delta).map_err(|source| PackError::Delta { offset, source })
}

/// Reads and resolves the object whose entry starts at `offset`.
///
/// Offset-delta chains are followed within the file. `resolve_ref` supplies
/// bases named by id.
pub fn read_object_at(
    pack_path: &Path,
    offset: u64,
    resolve_ref: &dyn Fn(&ObjectId) -> PackResult<ResolvedObject>,
) -> PackResult<ResolvedObject> {
    let file = File::open(pack_path)?;
    let mut reader = BufReader::new(file);
    let mut deltas: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut current = offset;

    let mut base = loop {
        if deltas.len() > MAX_DELTA_DEPTH {
            return Err(PackError::ChainTooDeep(offset));
        }
        reader.seek(SeekFrom::Start(current))?;
        let header = EntryHeader::read(&mut reader, current)?;
        let (data, _) = inflate(&mut reader, header.size, current)?;
        match header.kind {
            EntryKind::Base(kind) => break ResolvedObject { kind, data },
            EntryKind::OfsDelta { base_offset } => {
                deltas.push((current, data));
                current = base_offset;
            }
            EntryKind::RefDelta { base_id } => {
                deltas.push((current, data));
                break resolve_ref(&base_id)?;
            }
        }
    };

    while let Some((delta_offset, delta)) = deltas.pop() {
        base.data = apply(&base.data, &delta, delta_offset)?;
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackBuilder;
    use tempfile::TempDir;

    fn no_external(_: &ObjectId) -> Option<ResolvedObject> {
        None
    }

    #[test]
    fn test_index_base_objects() {
        let mut builder = PackBuilder::new();
        let a = builder.add(ObjectKind::Blob, b"alpha");
        let b = builder.add(ObjectKind::Tree, b"beta tree");
        let pack = builder.finish().unwrap();

        let index = index_pack(&pack, no_external).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.find(&a).unwrap().size, 5);
        assert_eq!(index.find(&b).unwrap().kind, ObjectKind::Tree);
    }

    #[test]
    fn test_index_resolves_deltas() {
        let mut builder = PackBuilder::new();
        let base = builder.add(ObjectKind::Blob, b"shared prefix, then one ending");
        let ofs = builder.add_ofs_delta(base, b"shared prefix, then another ending");
        let refd = builder.add_ref_delta(base, b"shared prefix, and a third");
        let pack = builder.finish().unwrap();

        let index = index_pack(&pack, no_external).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.find(&ofs).unwrap().kind, ObjectKind::Blob);
        assert_eq!(index.find(&refd).unwrap().size, 26);
    }

    #[test]
    fn test_thin_pack_uses_external_base() {
        let base_body = b"base stored locally".to_vec();
        let base_id = ObjectId::hash_object(ObjectKind::Blob, &base_body);

        let mut builder = PackBuilder::new();
        let target = builder.add_external_ref_delta(base_id, &base_body, b"base stored remotely");
        let pack = builder.finish().unwrap();

        assert!(matches!(
            index_pack(&pack, no_external),
            Err(PackError::UnresolvedBase(id)) if id == base_id
        ));

        let index = index_pack(&pack, |id| {
            (*id == base_id).then(|| ResolvedObject {
                kind: ObjectKind::Blob,
                data: base_body.clone(),
            })
        })
        .unwrap();
        assert!(index.contains(&target));
        assert!(!index.contains(&base_id));
    }

    #[test]
    fn test_corrupt_trailer_is_rejected() {
        let mut builder = PackBuilder::new();
        builder.add(ObjectKind::Blob, b"payload");
        let mut pack = builder.finish().unwrap();
        let last = pack.len() - 1;
        pack[last] ^= 0xff;

        assert!(matches!(
            index_pack(&pack, no_external),
            Err(PackError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_pack_is_rejected() {
        let mut builder = PackBuilder::new();
        builder.add(ObjectKind::Blob, b"payload");
        let pack = builder.finish().unwrap();
        assert!(index_pack(&pack[..pack.len() / 2], no_external).is_err());
        assert!(matches!(
            index_pack(b"PACK", no_external),
            Err(PackError::Truncated(_))
        ));
    }

    #[test]
    fn test_bad_signature() {
        let mut pack = PackBuilder::new().finish().unwrap();
        pack[0] = b'X';
        assert!(matches!(
            index_pack(&pack, no_external),
            Err(PackError::BadSignature)
        ));
    }

    #[test]
    fn test_read_object_at_follows_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack-test.pack");

        let mut builder = PackBuilder::new();
        let v1 = builder.add(ObjectKind::Blob, b"version one of the file");
        let v2 = builder.add_ofs_delta(v1, b"version one of the file, extended");
        let v3 = builder.add_ofs_delta(v2, b"version one of the file, extended twice");
        let pack = builder.finish().unwrap();
        std::fs::write(&path, &pack).unwrap();

        let index = index_pack(&pack, no_external).unwrap();
        let entry = index.find(&v3).unwrap();
        let object = read_object_at(&path, entry.offset, &|id| {
            Err(PackError::UnresolvedBase(*id))
        })
        .unwrap();

        assert_eq!(object.kind, ObjectKind::Blob);
        assert_eq!(object.data, b"version one of the file, extended twice");
        assert_eq!(ObjectId::hash_object(object.kind, &object.data), v3);
    }
}
