use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::core::{Error, Result};
use super::{UnitId, UnitStore};

/// Unit store backed by one file per unit in a directory
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Opens an existing packet directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::storage(format!(
                "packet directory {} does not exist",
                root.display()
            )));
        }
        Ok(DirStore { root })
    }

    /// Opens a packet directory, creating it if needed
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::storage(format!("Failed to create {}: {}", root.display(), e))
        })?;
        debug!(path = %root.display(), "packet directory ready");
        Ok(DirStore { root })
    }

    /// Directory holding the units
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one unit
    pub fn path_of(&self, unit: UnitId) -> PathBuf {
        self.root.join(unit.file_name())
    }
}

impl UnitStore for DirStore {
    fn put(&mut self, unit: UnitId, frame: &[u8]) -> Result<()> {
        let path = self.path_of(unit);
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&path)?;
            file.write_all(frame)?;
            file.flush()
        };
        write().map_err(|e| Error::storage(format!("Failed to write {}: {}", path.display(), e)))?;
        trace!(unit = %unit, "unit written");
        Ok(())
    }

    fn get(&self, unit: UnitId) -> Result<Option<Vec<u8>>> {
        let path = self.path_of(unit);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    fn contains(&self, unit: UnitId) -> Result<bool> {
        Ok(self.path_of(unit).is_file())
    }

    fn remove(&mut self, unit: UnitId) -> Result<bool> {
        let path = self.path_of(unit);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(format!("Failed to remove {}: {}", path.display(), e))),
        }
    }

    fn units(&self) -> Result<Vec<UnitId>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            Error::storage(format!("Failed to list {}: {}", self.root.display(), e))
        })?;

        let mut units = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(unit) = entry.file_name().to_str().and_then(|n| n.parse::<UnitId>().ok()) {
                units.push(unit);
            }
        }
        units.sort();
        Ok(units)
    }
}
