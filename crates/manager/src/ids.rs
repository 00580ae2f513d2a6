//! Session identifier generation: a short, unique, non-guessable token
//! with no ordering relationship with the session's creation time.

use sha1::{Digest, Sha1};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a fresh session identifier of the form `sha1:<40 hex chars>`,
/// derived from the current time, an in-process monotonic counter, and the
/// process id, so that two calls in the same process never collide and
/// collisions across processes are astronomically unlikely.
#[must_use]
pub fn generate() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha1::new();
    hasher.update(now.as_nanos().to_le_bytes());
    hasher.update(counter.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(8 + digest.len() * 2);
    hex.push_str("sha1:");
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identifiers_are_unique_and_well_formed() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        assert!(a.starts_with("sha1:"));
        assert_eq!(a.len(), "sha1:".len() + 40);
    }
}
