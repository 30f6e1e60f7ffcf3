//! Delta application.
//!
//! A delta starts with the base size and the result size (little-endian
//! 7-bit varints), followed by instructions:
//!
//! ```text
//! 1xxxxxxx  copy: bits 0-3 select offset bytes, bits 4-6 select size bytes
//! 0nnnnnnn  insert: the next n bytes are literal data (n > 0)
//! 00000000  reserved
//! ```

use thiserror::Error;

/// Errors raised while applying a delta.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeltaError {
    #[error("delta header truncated")]
    TruncatedHeader,

    #[error("base size mismatch: delta expects {expected}, base has {actual}")]
    BaseSizeMismatch { expected: u64, actual: u64 },

    #[error("result size mismatch: delta declares {expected}, produced {actual}")]
    ResultSizeMismatch { expected: u64, actual: u64 },

    #[error("copy instruction out of range: offset {offset} size {size} base {base_len}")]
    CopyOutOfRange {
        offset: u64,
        size: u64,
        base_len: usize,
    },

    #[error("instruction stream truncated")]
    TruncatedInstruction,

    #[error("reserved instruction 0")]
    ReservedInstruction,
}

fn read_size(delta: &[u8], pos: &mut usize) -> Result<u64, DeltaError> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = *delta.get(*pos).ok_or(DeltaError::TruncatedHeader)?;
        *pos += 1;
        if shift > 63 {
            return Err(DeltaError::TruncatedHeader);
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// Applies `delta` to `base`, producing the target object body.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let mut pos = 0;
    let base_size = read_size(delta, &mut pos)?;
    if base_size != base.len() as u64 {
        return Err(DeltaError::BaseSizeMismatch {
            expected: base_size,
            actual: base.len() as u64,
        });
    }
    let result_size = read_size(delta, &mut pos)?;
    let mut out = Vec::with_capacity(result_size.min(1 << 26) as usize);

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut offset = 0u64;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    let byte = *delta.get(pos).ok_or(DeltaError::TruncatedInstruction)?;
                    pos += 1;
                    offset |= u64::from(byte) << (8 * i);
                }
            }
            let mut size = 0u64;
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    let byte = *delta.get(pos).ok_or(DeltaError::TruncatedInstruction)?;
                    pos += 1;
                    size |= u64::from(byte) << (8 * i);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= base.len() as u64)
                .ok_or(DeltaError::CopyOutOfRange {
                    offset,
                    size,
                    base_len: base.len(),
                })?;
            out.extend_from_slice(&base[offset as usize..end as usize]);
        } else if cmd != 0 {
            let len = cmd as usize;
            let literal = delta
                .get(pos..pos + len)
                .ok_or(DeltaError::TruncatedInstruction)?;
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(DeltaError::ReservedInstruction);
        }
    }

    if out.len() as u64 != result_size {
        return Err(DeltaError::ResultSizeMismatch {
            expected: result_size,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

fn write_size(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Produces a delta that copies the longest shared prefix of `base` and
/// inserts the remainder of `target` literally.
pub(crate) fn encode_prefix_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_size(base.len() as u64, &mut out);
    write_size(target.len() as u64, &mut out);

    let shared = base
        .iter()
        .zip(target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut copied = 0;
    while copied < shared {
        let chunk = (shared - copied).min(0xffff);
        let mut cmd = 0x80u8;
        let mut args = Vec::new();
        for i in 0..4 {
            let byte = ((copied >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 1 << i;
                args.push(byte);
            }
        }
        for i in 0..2 {
            let byte = ((chunk >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 0x10 << i;
                args.push(byte);
            }
        }
        out.push(cmd);
        out.extend_from_slice(&args);
        copied += chunk;
    }

    for literal in target[shared..].chunks(0x7f) {
        out.push(literal.len() as u8);
        out.extend_from_slice(literal);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_copy_and_insert() {
        let base = b"hello world";
        // base 11, result 13, copy offset 0 size 6, insert "there!!"
        let delta = vec![11, 13, 0x90, 6, 7, b't', b'h', b'e', b'r', b'e', b'!', b'!'];
        assert_eq!(apply_delta(base, &delta).unwrap(), b"hello there!!");
    }

    #[test]
    fn test_base_size_mismatch() {
        let err = apply_delta(b"abc", &[4, 1, 1, b'x']).unwrap_err();
        assert_eq!(
            err,
            DeltaError::BaseSizeMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_copy_out_of_range() {
        let err = apply_delta(b"abc", &[3, 5, 0x91, 1, 5]).unwrap_err();
        assert!(matches!(err, DeltaError::CopyOutOfRange { .. }));
    }

    #[test]
    fn test_reserved_instruction() {
        assert_eq!(
            apply_delta(b"", &[0, 0, 0]).unwrap_err(),
            DeltaError::ReservedInstruction
        );
    }

    #[test]
    fn test_truncated_insert() {
        assert_eq!(
            apply_delta(b"", &[0, 3, 3, b'a']).unwrap_err(),
            DeltaError::TruncatedInstruction
        );
    }

    proptest! {
        #[test]
        fn prefix_delta_reproduces_target(
            base in proptest::collection::vec(any::<u8>(), 0..2048),
            target in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let delta = encode_prefix_delta(&base, &target);
            prop_assert_eq!(apply_delta(&base, &delta).unwrap(), target);
        }
    }
}
