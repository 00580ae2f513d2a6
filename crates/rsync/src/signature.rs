//! Block signatures computed over a base's content.

use checksums::rolling::RollingChecksum;
use checksums::HashAlgorithm;
use serde::{Deserialize, Serialize};

/// Default block size used when a caller doesn't have a better estimate
/// (e.g. from the reverse cache's recorded file size).
pub const DEFAULT_BLOCK_SIZE: u32 = 700;

/// One base block's weak and strong checksums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    /// Adler-32-style rolling checksum of the block.
    pub weak: u32,
    /// Strong digest of the block, using the signature's algorithm.
    pub strong: Vec<u8>,
}

/// A base's block signature: a `weak`/`strong` pair per fixed-size block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Size in bytes of every block except possibly the last.
    pub block_size: u32,
    /// Algorithm used for [`SignatureBlock::strong`].
    pub algorithm: HashAlgorithm,
    /// One entry per base block, in base order.
    pub blocks: Vec<SignatureBlock>,
}

impl Signature {
    /// The zero-value signature: no blocks, meaning "no base; treat as
    /// empty" per the staging protocol.
    #[must_use]
    pub fn empty(algorithm: HashAlgorithm) -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            algorithm,
            blocks: Vec::new(),
        }
    }

    /// Whether this is the zero-value "no base" signature.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Computes the signature of `base`, using `block_size`-byte blocks
    /// (the final block may be shorter).
    #[must_use]
    pub fn compute(base: &[u8], block_size: u32, algorithm: HashAlgorithm) -> Self {
        let block_size = block_size.max(1);
        let mut blocks = Vec::with_capacity(base.len() / block_size as usize + 1);
        for chunk in base.chunks(block_size as usize) {
            let weak = RollingChecksum::of(chunk).value();
            let strong = {
                let mut hasher = algorithm.hasher();
                hasher.update(chunk);
                hasher.finalize()
            };
            blocks.push(SignatureBlock { weak, strong });
        }
        Self {
            block_size,
            algorithm,
            blocks,
        }
    }

    /// Byte length of block `index`, accounting for a possibly-shorter
    /// final block given the original base length.
    #[must_use]
    pub fn block_len(&self, index: usize, base_len: u64) -> u64 {
        let start = index as u64 * u64::from(self.block_size);
        let end = (start + u64::from(self.block_size)).min(base_len);
        end.saturating_sub(start)
    }
}

/// Picks a block size scaled to the base's size, mirroring rsync's
/// square-root heuristic so small files get small blocks and large files
/// get coarser ones.
#[must_use]
pub fn recommended_block_size(base_len: u64) -> u32 {
    if base_len == 0 {
        return DEFAULT_BLOCK_SIZE;
    }
    let sqrt = (base_len as f64).sqrt() as u64;
    sqrt.clamp(500, 1 << 17) as u32
}
