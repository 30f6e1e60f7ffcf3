//! Pack writer.
//!
//! Produces well-formed version 2 packs. The in-memory remote store uses it to
//! answer batch requests and the tests use it to build fixtures.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use super::delta::encode_prefix_delta;
use super::entry::{encode_header, encode_offset_distance, OFS_DELTA_CODE, REF_DELTA_CODE};
use super::PACK_SIGNATURE;
use crate::object::{ObjectId, ObjectKind};

enum Pending {
    Base {
        kind: ObjectKind,
        body: Vec<u8>,
    },
    OfsDelta {
        base_index: usize,
        delta: Vec<u8>,
    },
    RefDelta {
        base_id: ObjectId,
        delta: Vec<u8>,
    },
}

/// Accumulates objects and serializes them as a pack.
#[derive(Default)]
pub struct PackBuilder {
    pending: Vec<Pending>,
    known: HashMap<ObjectId, (usize, ObjectKind, Vec<u8>)>,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True if an object with this id was already added.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.known.contains_key(id)
    }

    /// Adds a complete object and returns its id.
    pub fn add(&mut self, kind: ObjectKind, body: &[u8]) -> ObjectId {
        let id = ObjectId::hash_object(kind, body);
        self.known
            .insert(id, (self.pending.len(), kind, body.to_vec()));
        self.pending.push(Pending::Base {
            kind,
            body: body.to_vec(),
        });
        id
    }

    /// Adds `target` as an offset delta against a previously added object.
    ///
    /// Falls back to a full entry when `base` is unknown.
    pub fn add_ofs_delta(&mut self, base: ObjectId, target: &[u8]) -> ObjectId {
        let Some((base_index, kind, base_body)) = self.known.get(&base).cloned() else {
            return self.add(ObjectKind::Blob, target);
        };
        let delta = encode_prefix_delta(&base_body, target);
        self.push_delta(kind, target, Pending::OfsDelta { base_index, delta })
    }

    /// Adds `target` as a ref delta against a previously added object.
    pub fn add_ref_delta(&mut self, base: ObjectId, target: &[u8]) -> ObjectId {
        let Some((_, kind, base_body)) = self.known.get(&base).cloned() else {
            return self.add(ObjectKind::Blob, target);
        };
        let delta = encode_prefix_delta(&base_body, target);
        self.push_delta(
            kind,
            target,
            Pending::RefDelta {
                base_id: base,
                delta,
            },
        )
    }

    /// Adds a blob as a ref delta against an object that is not in the pack,
    /// producing a thin pack.
    pub fn add_external_ref_delta(
        &mut self,
        base_id: ObjectId,
        base_body: &[u8],
        target: &[u8],
    ) -> ObjectId {
        let delta = encode_prefix_delta(base_body, target);
        self.push_delta(ObjectKind::Blob, target, Pending::RefDelta { base_id, delta })
    }

    fn push_delta(&mut self, kind: ObjectKind, target: &[u8], entry: Pending) -> ObjectId {
        let id = ObjectId::hash_object(kind, target);
        self.known
            .insert(id, (self.pending.len(), kind, target.to_vec()));
        self.pending.push(entry);
        id
    }

    /// Serializes the pack, including its SHA-1 trailer.
    pub fn finish(self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(PACK_SIGNATURE);
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&(self.pending.len() as u32).to_be_bytes());

        let mut offsets = Vec::with_capacity(self.pending.len());
        for entry in &self.pending {
            let offset = out.len() as u64;
            offsets.push(offset);
            let body = match entry {
                Pending::Base { kind, body } => {
                    encode_header(kind.pack_code(), body.len() as u64, &mut out);
                    body
                }
                Pending::OfsDelta { base_index, delta } => {
                    encode_header(OFS_DELTA_CODE, delta.len() as u64, &mut out);
                    encode_offset_distance(offset - offsets[*base_index], &mut out);
                    delta
                }
                Pending::RefDelta { base_id, delta } => {
                    encode_header(REF_DELTA_CODE, delta.len() as u64, &mut out);
                    out.extend_from_slice(base_id.as_bytes());
                    delta
                }
            };
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            out.extend_from_slice(&encoder.finish()?);
        }

        let trailer = Sha1::digest(&out);
        out.extend_from_slice(&trailer);
        Ok(out)
    }
}
