use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Error;

/// Fixed key the token slot is stored under.
pub const TOKEN_KEY: &str = "token";

/// Single-slot persistent storage for the bearer token.
///
/// At most one token is held. [`store`](TokenStore::store) overwrites,
/// [`clear`](TokenStore::clear) removes the slot and is idempotent.
pub trait TokenStore: Send + Sync + 'static {
    /// Reads the slot. `Ok(None)` when nothing is stored.
    fn load(&self) -> Result<Option<String>, Error>;

    /// Replaces the slot contents.
    fn store(&self, token: &str) -> Result<(), Error>;

    /// Removes the slot.
    fn clear(&self) -> Result<(), Error>;
}

impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    fn load(&self) -> Result<Option<String>, Error> {
        (**self).load()
    }

    fn store(&self, token: &str) -> Result<(), Error> {
        (**self).store(token)
    }

    fn clear(&self) -> Result<(), Error> {
        (**self).clear()
    }
}

/// In-process token slot. Share it between sessions with an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>, Error> {
        Ok(self.slot.read().clone())
    }

    fn store(&self, token: &str) -> Result<(), Error> {
        *self.slot.write() = Some(token.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        self.slot.write().take();
        Ok(())
    }
}

/// Token slot backed by a single file, shared by every process that points
/// at the same path.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/armoire/token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the platform has no config directory.
    pub fn default_path() -> Result<PathBuf, Error> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("cannot determine config directory".into()))?;
        Ok(dir.join("armoire").join(TOKEN_KEY))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>, Error> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, token: &str) -> Result<(), Error> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(token.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_single_slot() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);

        store.store("first").unwrap();
        store.store("second").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("second"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn memory_store_clear_is_idempotent() {
        let store = MemoryTokenStore::with_token("t");
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn shared_store_through_arc() {
        let store = Arc::new(MemoryTokenStore::new());
        let other = Arc::clone(&store);
        other.store("t").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("t"));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join(TOKEN_KEY));
        assert_eq!(store.load().unwrap(), None);

        store.store("abc.def.ghi").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("abc.def.ghi"));

        store.store("x").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("x"));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn file_store_seen_by_second_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOKEN_KEY);
        let a = FileTokenStore::new(&path);
        let b = FileTokenStore::new(&path);

        a.store("shared").unwrap();
        assert_eq!(b.load().unwrap().as_deref(), Some("shared"));
        b.clear().unwrap();
        assert_eq!(a.load().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join(TOKEN_KEY));
        store.store("secret").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn default_path_ends_with_token_key() {
        if let Ok(path) = FileTokenStore::default_path() {
            assert!(path.ends_with(Path::new("armoire").join(TOKEN_KEY)));
        }
    }
}
