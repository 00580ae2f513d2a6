//! Delta computation ([`deltify`]) and reconstruction ([`patch`]).

use crate::signature::Signature;
use crate::transmission::{RsyncError, Result, MAX_DATA_SIZE};
use checksums::rolling::RollingChecksum;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A single instruction in a delta stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Copy base block `block_index` verbatim.
    Block(u32),
    /// Emit these literal bytes (never longer than
    /// [`crate::transmission::MAX_DATA_SIZE`]).
    Data(Vec<u8>),
}

/// Computes the sequence of operations that reconstruct `target` given
/// `signature` of some base. Matching blocks become [`Operation::Block`]
/// references; everything else is emitted as [`Operation::Data`] literals,
/// split so no chunk exceeds [`MAX_DATA_SIZE`].
#[must_use]
pub fn deltify(target: &[u8], signature: &Signature) -> Vec<Operation> {
    if signature.is_empty() || target.is_empty() {
        return data_operations(target);
    }

    let mut by_weak: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
    for (index, block) in signature.blocks.iter().enumerate() {
        by_weak.entry(block.weak).or_default().push(index as u32);
    }

    let block_size = signature.block_size as usize;
    let mut ops = Vec::new();
    let mut literal = Vec::new();
    let mut pos = 0usize;

    while pos < target.len() {
        let window_end = (pos + block_size).min(target.len());
        let window = &target[pos..window_end];
        let weak = RollingChecksum::of(window).value();

        let matched = by_weak.get(&weak).and_then(|candidates| {
            candidates.iter().copied().find(|&index| {
                let mut hasher = signature.algorithm.hasher();
                hasher.update(window);
                hasher.finalize() == signature.blocks[index as usize].strong
            })
        });

        if let Some(index) = matched {
            flush_literal(&mut literal, &mut ops);
            ops.push(Operation::Block(index));
            pos = window_end;
        } else {
            literal.push(target[pos]);
            if literal.len() >= MAX_DATA_SIZE {
                flush_literal(&mut literal, &mut ops);
            }
            pos += 1;
        }
    }
    flush_literal(&mut literal, &mut ops);
    ops
}

fn flush_literal(literal: &mut Vec<u8>, ops: &mut Vec<Operation>) {
    if !literal.is_empty() {
        ops.push(Operation::Data(std::mem::take(literal)));
    }
}

fn data_operations(target: &[u8]) -> Vec<Operation> {
    target
        .chunks(MAX_DATA_SIZE)
        .map(|chunk| Operation::Data(chunk.to_vec()))
        .collect()
}

/// Reconstructs the target byte stream by replaying `operations` against
/// `base`, using `signature` to size [`Operation::Block`] references.
///
/// Returns [`RsyncError::InvalidBlockIndex`] if an operation references a
/// block index past the end of `signature`.
pub fn patch(base: &[u8], signature: &Signature, operations: &[Operation]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    for op in operations {
        match op {
            Operation::Data(bytes) => output.extend_from_slice(bytes),
            Operation::Block(index) => {
                let index = *index as usize;
                if index >= signature.blocks.len() {
                    return Err(RsyncError::InvalidBlockIndex {
                        index: index as u32,
                        block_count: signature.blocks.len() as u32,
                    });
                }
                let start = index * signature.block_size as usize;
                let len = signature.block_len(index, base.len() as u64) as usize;
                let end = (start + len).min(base.len());
                if start > base.len() {
                    return Err(RsyncError::InvalidBlockIndex {
                        index: index as u32,
                        block_count: signature.blocks.len() as u32,
                    });
                }
                output.extend_from_slice(&base[start..end]);
            }
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksums::HashAlgorithm;

    #[test]
    fn round_trips_when_target_equals_base() {
        let base = b"the quick brown fox jumps over the lazy dog".to_vec();
        let sig = Signature::compute(&base, 8, HashAlgorithm::Sha1);
        let ops = deltify(&base, &sig);
        let patched = patch(&base, &sig, &ops).unwrap();
        assert_eq!(patched, base);
        assert!(ops.iter().any(|op| matches!(op, Operation::Block(_))));
    }

    #[test]
    fn round_trips_with_small_edit() {
        let base = b"0123456789abcdefghijklmnopqrstuvwxyz".to_vec();
        let mut target = base.clone();
        target.insert(10, b'X');
        let sig = Signature::compute(&base, 6, HashAlgorithm::Sha1);
        let ops = deltify(&target, &sig);
        let patched = patch(&base, &sig, &ops).unwrap();
        assert_eq!(patched, target);
    }

    #[test]
    fn empty_base_signature_yields_all_literal_data() {
        let sig = Signature::empty(HashAlgorithm::Sha1);
        let target = b"brand new content".to_vec();
        let ops = deltify(&target, &sig);
        assert!(ops.iter().all(|op| matches!(op, Operation::Data(_))));
        let patched = patch(b"", &sig, &ops).unwrap();
        assert_eq!(patched, target);
    }

    #[test]
    fn empty_target_yields_no_operations() {
        let sig = Signature::compute(b"some base content", 4, HashAlgorithm::Sha1);
        assert!(deltify(b"", &sig).is_empty());
    }

    #[test]
    fn invalid_block_index_is_rejected() {
        let sig = Signature::compute(b"short", 4, HashAlgorithm::Sha1);
        let ops = vec![Operation::Block(99)];
        assert!(matches!(
            patch(b"short", &sig, &ops),
            Err(RsyncError::InvalidBlockIndex { .. })
        ));
    }

    #[test]
    fn literal_chunks_respect_max_data_size() {
        let target = vec![b'x'; MAX_DATA_SIZE * 2 + 10];
        let sig = Signature::empty(HashAlgorithm::Sha1);
        let ops = deltify(&target, &sig);
        for op in &ops {
            if let Operation::Data(bytes) = op {
                assert!(bytes.len() <= MAX_DATA_SIZE);
            }
        }
    }
}
