//! Durable session state: descriptors, ancestors, and per-endpoint scan
//! caches, each written atomically (temp file + rename) under a state
//! directory laid out as `<state>/{sessions,ancestors,caches}/<id>[/alpha|beta]`.

use model::{Cache, Entry};
use session::SessionDescriptor;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Errors produced while reading or writing durable session state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The state directory (or one of its subdirectories/files) could not
    /// be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted file's bytes did not decode as the expected type.
    #[error("corrupt session state: {0}")]
    Decode(#[from] bincode::Error),
}

/// Result type for [`SessionStore`] operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Owns the on-disk layout for every session the manager tracks.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Opens (creating if necessary) a session store rooted at `state_dir`.
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let root = state_dir.into();
        std::fs::create_dir_all(root.join("sessions"))?;
        std::fs::create_dir_all(root.join("ancestors"))?;
        std::fs::create_dir_all(root.join("caches"))?;
        Ok(Self { root })
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn ancestors_dir(&self) -> PathBuf {
        self.root.join("ancestors")
    }

    fn cache_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("caches").join(session_id)
    }

    /// Every session identifier with a persisted descriptor, in no
    /// particular order.
    pub fn list_identifiers(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(self.sessions_dir())? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_owned());
            }
        }
        Ok(ids)
    }

    /// Persists `descriptor`, replacing any previous version.
    pub fn save_descriptor(&self, descriptor: &SessionDescriptor) -> Result<()> {
        let path = self.sessions_dir().join(&descriptor.identifier);
        write_atomically(&path, &bincode::serialize(descriptor)?)?;
        Ok(())
    }

    /// Loads a previously persisted descriptor.
    pub fn load_descriptor(&self, session_id: &str) -> Result<SessionDescriptor> {
        let bytes = std::fs::read(self.sessions_dir().join(session_id))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Loads every persisted descriptor, skipping (and logging) any entry
    /// that fails to decode rather than aborting the whole load.
    pub fn load_all_descriptors(&self) -> Result<Vec<SessionDescriptor>> {
        let mut descriptors = Vec::new();
        for id in self.list_identifiers()? {
            match self.load_descriptor(&id) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(error) => tracing::warn!(session_id = %id, %error, "failed to load session descriptor"),
            }
        }
        Ok(descriptors)
    }

    /// Deletes every durable trace of a session: its descriptor, ancestor,
    /// and caches.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        remove_if_present(&self.sessions_dir().join(session_id))?;
        remove_if_present(&self.ancestors_dir().join(session_id))?;
        let cache_dir = self.cache_dir(session_id);
        if cache_dir.is_dir() {
            std::fs::remove_dir_all(&cache_dir)?;
        }
        Ok(())
    }

    /// Persists `ancestor` as the new ancestor tree for `session_id`.
    pub fn save_ancestor(&self, session_id: &str, ancestor: &Entry) -> Result<()> {
        let path = self.ancestors_dir().join(session_id);
        write_atomically(&path, &ancestor.encode()?)?;
        Ok(())
    }

    /// Loads a session's persisted ancestor, or an empty directory if none
    /// has ever been saved (a brand-new session).
    pub fn load_ancestor(&self, session_id: &str) -> Result<Entry> {
        match std::fs::read(self.ancestors_dir().join(session_id)) {
            Ok(bytes) => Ok(Entry::decode(&bytes)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Entry::empty_directory()),
            Err(error) => Err(error.into()),
        }
    }

    /// Persists `cache` as `session_id`'s cache for `side`.
    pub fn save_cache(&self, session_id: &str, side: Side, cache: &Cache) -> Result<()> {
        let dir = self.cache_dir(session_id);
        std::fs::create_dir_all(&dir)?;
        write_atomically(&dir.join(side.file_name()), &bincode::serialize(cache)?)?;
        Ok(())
    }

    /// Loads a session's persisted cache for `side`, or an empty cache if
    /// none has ever been saved.
    pub fn load_cache(&self, session_id: &str, side: Side) -> Result<Cache> {
        match std::fs::read(self.cache_dir(session_id).join(side.file_name())) {
            Ok(bytes) => Ok(bincode::deserialize(&bytes)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Cache::new()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Which of a session's two endpoints a persisted cache belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Alpha.
    Alpha,
    /// Beta.
    Beta,
}

impl Side {
    fn file_name(self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

fn write_atomically(destination: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.persist(destination).map_err(|error| error.error)?;
    Ok(())
}
