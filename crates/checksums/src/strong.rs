//! Strong (cryptographic/near-cryptographic) digests used to disambiguate
//! rolling-checksum collisions and to content-address scanned files.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::Xxh3;

/// Digest algorithm negotiated for a session.
///
/// A session fixes one algorithm for the lifetime of its ancestor tree;
/// changing it requires a reset (see the controller's `Reset` operation),
/// since digests computed with different algorithms are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-1, 20-byte digest.
    Sha1,
    /// SHA-256, 32-byte digest.
    Sha256,
    /// XXH3 128-bit, 16-byte digest. Not cryptographically secure; offered
    /// for throughput-sensitive trusted-endpoint sessions.
    Xxh3_128,
}

impl HashAlgorithm {
    /// Byte width of a digest produced by this algorithm.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Xxh3_128 => 16,
        }
    }

    /// Creates a fresh streaming hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> Box<dyn StreamingHasher> {
        match self {
            Self::Sha1 => Box::new(Sha1::new()),
            Self::Sha256 => Box::new(Sha256::new()),
            Self::Xxh3_128 => Box::new(Xxh3Hasher(Xxh3::new())),
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha1
    }
}

/// Object-safe streaming hasher, implemented for each [`HashAlgorithm`].
pub trait StreamingHasher {
    /// Feeds additional bytes into the digest state.
    fn update(&mut self, data: &[u8]);
    /// Consumes the hasher and returns the final digest bytes.
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

impl StreamingHasher for Sha1 {
    fn update(&mut self, data: &[u8]) {
        sha1::Digest::update(self, data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        sha1::Digest::finalize(*self).to_vec()
    }
}

impl StreamingHasher for Sha256 {
    fn update(&mut self, data: &[u8]) {
        Digest::update(self, data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        Digest::finalize(*self).to_vec()
    }
}

struct Xxh3Hasher(Xxh3);

impl StreamingHasher for Xxh3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.digest128().to_be_bytes().to_vec()
    }
}

/// Typed wrapper that pairs digest bytes with the algorithm that produced
/// them, so the scanner and rsync engine never compare digests computed
/// with different algorithms.
pub trait StrongDigest: Sized {
    /// Algorithm identifier for this digest type.
    const ALGORITHM: HashAlgorithm;

    /// Computes the digest of `data` in one call.
    fn digest(data: &[u8]) -> Vec<u8> {
        let mut hasher = Self::ALGORITHM.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_known_vector() {
        let mut hasher = HashAlgorithm::Sha1.hasher();
        hasher.update(b"abc");
        let digest = hasher.finalize();
        assert_eq!(digest.len(), 20);
        assert_eq!(
            hex(&digest),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    #[test]
    fn sha256_matches_known_vector() {
        let mut hasher = HashAlgorithm::Sha256.hasher();
        hasher.update(b"abc");
        let digest = hasher.finalize();
        assert_eq!(
            hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn xxh3_is_deterministic_and_fixed_width() {
        let mut a = HashAlgorithm::Xxh3_128.hasher();
        a.update(b"hello");
        let da = a.finalize();
        let mut b = HashAlgorithm::Xxh3_128.hasher();
        b.update(b"hello");
        let db = b.finalize();
        assert_eq!(da, db);
        assert_eq!(da.len(), 16);
    }

    #[test]
    fn different_algorithms_disagree() {
        let mut a = HashAlgorithm::Sha1.hasher();
        a.update(b"same input");
        let mut b = HashAlgorithm::Sha256.hasher();
        b.update(b"same input");
        assert_ne!(a.finalize(), b.finalize());
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
