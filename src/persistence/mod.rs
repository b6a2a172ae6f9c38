use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is locked by another krakenbot process")]
    Locked { path: PathBuf },
}

/// Advisory lock marking the single process allowed to write a state file
///
/// Held in `<state>.lock` for as long as the returned guard lives. The OS
/// releases it when the process exits, so a crash never leaves it stuck.
pub struct StateLock {
    path: PathBuf,
    lock: fd_lock::RwLock<fs::File>,
}

impl StateLock {
    pub fn open(state_path: &Path) -> Result<Self, PersistenceError> {
        let mut path = state_path.to_path_buf().into_os_string();
        path.push(".lock");
        let path = PathBuf::from(path);

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            lock: fd_lock::RwLock::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting; `Locked` if another holder has it
    pub fn try_acquire(
        &mut self,
    ) -> Result<fd_lock::RwLockWriteGuard<'_, fs::File>, PersistenceError> {
        match self.lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(PersistenceError::Locked {
                path: self.path.clone(),
            }),
            Err(source) => Err(PersistenceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// JSON state file replaced atomically on every save
///
/// Writes go to `<path>.tmp`, are fsynced, then renamed over `<path>`, so a
/// concurrent reader sees either the previous or the new file, never a torn
/// one.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Load the stored value, `None` if the file does not exist yet
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(&self.path, e)),
        };

        let value = serde_json::from_str(&contents).map_err(|source| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        Ok(Some(value))
    }

    fn write_and_rename(&self, tmp: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        let mut file = fs::File::create(tmp).map_err(|e| self.io_error(tmp, e))?;
        file.write_all(bytes).map_err(|e| self.io_error(tmp, e))?;
        file.sync_all().map_err(|e| self.io_error(tmp, e))?;
        fs::rename(tmp, &self.path).map_err(|e| self.io_error(&self.path, e))
    }

    /// Durably replace the stored value
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(value).map_err(PersistenceError::Serialize)?;
        let tmp = self.temp_path();

        let result = self.write_and_rename(&tmp, json.as_bytes());
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }

        result?;
        tracing::debug!(path = %self.path.display(), bytes = json.len(), "Persisted state");
        Ok(())
    }
}
