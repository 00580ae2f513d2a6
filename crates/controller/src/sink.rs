//! The persistence seam a controller calls into whenever its ancestor
//! advances. The manager implements this against its atomic per-session
//! ancestor file; tests can substitute an in-memory stub.

use async_trait::async_trait;
use model::Entry;

/// Persists a session's ancestor tree. Implementations are expected to
/// write atomically (temp file + rename), matching every other durable
/// write in this engine.
#[async_trait]
pub trait AncestorSink: Send + Sync {
    /// Persists `ancestor` as the new ancestor for `session_id`.
    async fn save_ancestor(&self, session_id: &str, ancestor: &Entry) -> std::io::Result<()>;
}

/// An [`AncestorSink`] that discards every write, for sessions or tests
/// that don't need ancestor persistence across restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAncestorSink;

#[async_trait]
impl AncestorSink for NullAncestorSink {
    async fn save_ancestor(&self, _session_id: &str, _ancestor: &Entry) -> std::io::Result<()> {
        Ok(())
    }
}
