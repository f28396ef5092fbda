//! Miner state persistence
//!
//! The state format is private: a serialized snapshot of the tree and
//! cluster map with no cross-version compatibility guarantee. Round-trip
//! within one version restores the exact cluster map.

use crate::error::{LogweaveError, Result};
use std::path::PathBuf;

/// Destination for serialized miner state
pub trait PersistenceHandler {
    fn save_state(&mut self, state: &[u8]) -> Result<()>;
    fn load_state(&mut self) -> Result<Option<Vec<u8>>>;
}

/// File-backed persistence
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PersistenceHandler for FilePersistence {
    fn save_state(&mut self, state: &[u8]) -> Result<()> {
        std::fs::write(&self.path, state).map_err(|e| LogweaveError::Io {
            source: e,
            context: format!("Failed to write miner state: {:?}", self.path),
        })
    }

    fn load_state(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read(&self.path)
            .map(Some)
            .map_err(|e| LogweaveError::Io {
                source: e,
                context: format!("Failed to read miner state: {:?}", self.path),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner.state");
        let mut persistence = FilePersistence::new(&path);

        assert!(persistence.load_state().unwrap().is_none());
        persistence.save_state(b"state bytes").unwrap();
        assert_eq!(persistence.load_state().unwrap().unwrap(), b"state bytes");
    }
}
