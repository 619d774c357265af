use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::core::{Error, Result, DATA_SIZE, FILL_BYTE};
use crate::protocol::InitRecord;

/// Byte used for scaffold regions no packet has touched yet
pub const BLANK_BYTE: u8 = b' ';

/// In-progress output file with one `DATA_SIZE` slot per pid
///
/// Slots are written in place on disk, so the file is never held in memory.
#[derive(Debug)]
pub struct Scaffold {
    file: File,
    path: PathBuf,
    len: u64,
}

impl Scaffold {
    /// Creates a blank scaffold of the expected file size, replacing any file at `path`
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::storage(format!("Failed to create {}: {}", path.display(), e)))?;
        {
            let mut writer = BufWriter::new(&file);
            io::copy(&mut io::repeat(BLANK_BYTE).take(size), &mut writer)
                .and_then(|_| writer.flush())
                .map_err(|e| Error::storage(format!("Failed to write {}: {}", path.display(), e)))?;
        }
        Ok(Scaffold { file, path: path.to_path_buf(), len: size })
    }

    /// Opens an in-progress output file
    pub fn open(path: &Path) -> Result<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::storage(format!("no in-progress output at {}", path.display())))
            }
            Err(e) => return Err(Error::storage(format!("Failed to open {}: {}", path.display(), e))),
        };
        let len = file
            .metadata()
            .map_err(|e| Error::storage(format!("Failed to stat {}: {}", path.display(), e)))?
            .len();
        Ok(Scaffold { file, path: path.to_path_buf(), len })
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the scaffold has zero size
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots needed to cover the whole size
    pub fn slot_count(&self) -> u64 {
        self.len.div_ceil(DATA_SIZE as u64)
    }

    /// Byte range of a slot, clipped to the scaffold size
    pub fn slot_range(&self, pid: u64) -> Option<Range<u64>> {
        let start = pid.checked_mul(DATA_SIZE as u64)?;
        if start >= self.len {
            return None;
        }
        Some(start..(start + DATA_SIZE as u64).min(self.len))
    }

    /// Reads back the contents of one slot
    pub fn slot(&mut self, pid: u64) -> Result<Option<Vec<u8>>> {
        let Some(range) = self.slot_range(pid) else {
            return Ok(None);
        };
        let mut bytes = vec![0u8; (range.end - range.start) as usize];
        self.file
            .seek(SeekFrom::Start(range.start))
            .and_then(|_| self.file.read_exact(&mut bytes))
            .map_err(|e| Error::storage(format!("Failed to read {}: {}", self.path.display(), e)))?;
        Ok(Some(bytes))
    }

    /// Writes a recovered payload into its slot.
    ///
    /// Returns `false` when the slot lies beyond the scaffold size.
    pub fn fill(&mut self, pid: u64, payload: &[u8]) -> Result<bool> {
        let Some(range) = self.slot_range(pid) else {
            return Ok(false);
        };
        let len = payload.len().min((range.end - range.start) as usize);
        self.write_at(range.start, &payload[..len])?;
        Ok(true)
    }

    /// Marks a slot as missing with the placeholder fill
    pub fn fill_placeholder(&mut self, pid: u64) -> Result<bool> {
        let Some(range) = self.slot_range(pid) else {
            return Ok(false);
        };
        let placeholder = [FILL_BYTE; DATA_SIZE];
        self.write_at(range.start, &placeholder[..(range.end - range.start) as usize])?;
        Ok(true)
    }

    /// Flushes written slots to disk
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| Error::storage(format!("Failed to sync {}: {}", self.path.display(), e)))
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(bytes))
            .map_err(|e| Error::storage(format!("Failed to write {}: {}", self.path.display(), e)))
    }
}

/// Missing-packet ledger persisted beside an in-progress output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// Init record of the stream being rebuilt
    pub record: InitRecord,
    /// Confirmed gaps still waiting for their unit
    pub missing: BTreeSet<u64>,
}

impl Ledger {
    /// Creates a ledger
    pub fn new(record: InitRecord, missing: BTreeSet<u64>) -> Self {
        Ledger { record, missing }
    }

    /// Whether no gaps remain
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    /// Reads a ledger; `Ok(None)` when none was written
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage(format!("Failed to read {}: {}", path.display(), e)))
            }
        };
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| Error::serialization(format!("Failed to decode ledger: {}", e)))
    }

    /// Writes the ledger
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| Error::serialization(format!("Failed to encode ledger: {}", e)))?;
        fs::write(path, bytes)
            .map_err(|e| Error::storage(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Deletes a ledger file if present
    pub fn discard(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("Failed to remove {}: {}", path.display(), e))),
        }
    }
}
