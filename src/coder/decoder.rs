use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use tracing::{debug, info, warn};

use crate::core::{Error, Result, DEFAULT_MAX_FILE_SIZE};
use crate::protocol::{InitRecord, Packet};
use crate::store::{UnitId, UnitStore};
use super::scaffold::{Ledger, Scaffold};

/// Extension of the in-progress output
pub const SCAFFOLD_EXTENSION: &str = "scaff";

/// Extension of the persisted missing-packet ledger
pub const LEDGER_EXTENSION: &str = "ledger";

/// What looking up one pid found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The unit exists and was recovered
    Found(Vec<u8>),
    /// The unit is missing but the stream continues past it
    Gap,
    /// No further units exist
    EndOfStream,
}

/// Result of a bulk pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Every slot was filled and the final file is in place
    Complete {
        /// Final output
        path: PathBuf,
        /// Bytes written
        size: u64,
    },
    /// Gaps remain; the in-progress output waits for late packets
    Incomplete {
        /// Pids recorded in the missing-packet ledger
        missing: Vec<u64>,
        /// In-progress output
        scaffold: PathBuf,
    },
}

impl DecodeOutcome {
    /// Whether the final file was produced
    pub fn is_complete(&self) -> bool {
        matches!(self, DecodeOutcome::Complete { .. })
    }
}

/// Result of an asynchronous pass for one pid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LateOutcome {
    /// The slot was patched; `remaining` lists gaps still open
    Patched {
        /// Gaps still in the ledger, empty when no ledger was found
        remaining: Vec<u64>,
    },
    /// The last gap was filled and the final file promoted
    Completed {
        /// Final output
        path: PathBuf,
    },
    /// The unit for that pid is not in the store yet
    NotFound,
}

/// Where the reconstructed file goes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Destination {
    dir: PathBuf,
    name: Option<String>,
}

impl Destination {
    /// A path ending in a separator, or naming an existing directory, leaves
    /// the file name to the init record.
    fn from_path(path: &Path) -> Self {
        let as_text = path.to_string_lossy();
        if path.is_dir() || as_text.ends_with('/') || as_text.ends_with(MAIN_SEPARATOR) {
            return Destination { dir: path.to_path_buf(), name: None };
        }
        match path.file_name() {
            Some(name) => Destination {
                dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                name: Some(name.to_string_lossy().into_owned()),
            },
            None => Destination { dir: path.to_path_buf(), name: None },
        }
    }
}

/// Rebuilds a file from its packet units
///
/// A decode session reads the init unit, then walks data units in pid order
/// filling a scaffold. Missing units that are followed by more data are
/// recorded as gaps and left as placeholder fill; the scaffold is then kept
/// as an in-progress file until [`Decoder::decode_late`] supplies them.
pub struct Decoder<S> {
    store: S,
    destination: Destination,
    destructive: bool,
    max_file_size: u64,
    record: Option<InitRecord>,
}

impl<S: UnitStore> Decoder<S> {
    /// Creates a decoder writing to `output`, a file path or a directory
    pub fn new(output: impl AsRef<Path>, store: S) -> Self {
        Decoder {
            store,
            destination: Destination::from_path(output.as_ref()),
            destructive: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            record: None,
        }
    }

    /// Delete consumed units once the final file is promoted
    pub fn destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    /// Largest file size accepted from the init record
    pub fn max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Unit store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable unit store, for units arriving after the bulk pass
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Init record, once read
    pub fn record(&self) -> Option<&InitRecord> {
        self.record.as_ref()
    }

    /// Reads the init unit. The output name comes from it unless one was given.
    pub fn init(&mut self) -> Result<&InitRecord> {
        let frame = self.store.get(UnitId::Init)?.ok_or_else(|| {
            Error::storage(format!("Could not read init unit {}", UnitId::Init))
        })?;
        let packet = Packet::from_frame(&frame)?;
        let record = InitRecord::from_packet(&packet)?;
        record.validate()?;
        if record.file_size > self.max_file_size {
            return Err(Error::format(format!(
                "init record declares {} bytes, more than the {} byte limit",
                record.file_size, self.max_file_size
            )));
        }

        if self.destination.name.is_none() {
            self.destination.name = Some(safe_file_name(&record.file_name)?);
        }
        info!(
            file = %record.file_name,
            packets = record.packet_count,
            bytes = record.file_size,
            "init record read"
        );

        Ok(&*self.record.insert(record))
    }

    /// Final output path
    pub fn final_path(&self) -> Result<PathBuf> {
        let name = self.destination.name.as_ref().ok_or_else(|| {
            Error::invalid_state("output file name unknown before the init unit is read")
        })?;
        Ok(self.destination.dir.join(name))
    }

    /// In-progress output path
    pub fn scaffold_path(&self) -> Result<PathBuf> {
        self.sibling(SCAFFOLD_EXTENSION)
    }

    /// Missing-packet ledger path
    pub fn ledger_path(&self) -> Result<PathBuf> {
        self.sibling(LEDGER_EXTENSION)
    }

    /// Reads the init unit and runs the bulk pass
    pub fn run(&mut self) -> Result<DecodeOutcome> {
        self.init()?;
        self.bulk_decode()
    }

    /// Walks every data unit in pid order and builds the scaffold
    pub fn bulk_decode(&mut self) -> Result<DecodeOutcome> {
        let record = self.ensure_init()?;
        let final_path = self.final_path()?;
        let scaffold_path = self.scaffold_path()?;
        info!(path = %final_path.display(), "Beginning to decode packets into a file");

        if final_path.exists() {
            warn!(path = %final_path.display(), "File already exists, overwriting with new data");
            fs::remove_file(&final_path).map_err(|e| {
                Error::storage(format!("Failed to remove {}: {}", final_path.display(), e))
            })?;
        }

        let mut scaffold = Scaffold::create(&scaffold_path, record.file_size)?;
        let mut missing = BTreeSet::new();

        let mut pid = 0u64;
        loop {
            match self.lookup(pid, &record)? {
                Lookup::Found(payload) => {
                    if !scaffold.fill(pid, &payload)? {
                        warn!(pid, "unit lies beyond the declared file size, ignored");
                    }
                }
                Lookup::Gap => {
                    if scaffold.fill_placeholder(pid)? {
                        warn!(pid, "packet missing, leaving placeholder");
                        missing.insert(pid);
                    } else {
                        warn!(pid, "gap lies beyond the declared file size, ignored");
                    }
                }
                Lookup::EndOfStream => break,
            }
            pid += 1;
        }

        scaffold.sync()?;
        drop(scaffold);
        info!(units = pid, "Completed read of packets");

        let ledger_path = self.ledger_path()?;
        if missing.is_empty() {
            self.promote(&scaffold_path, &final_path, &ledger_path, pid)?;
            info!(path = %final_path.display(), "Successfully decoded packets into a file");
            return Ok(DecodeOutcome::Complete { path: final_path, size: record.file_size });
        }

        let ledger = Ledger::new(record, missing);
        ledger.save(&ledger_path)?;
        let missing: Vec<u64> = ledger.missing.into_iter().collect();
        warn!(missing = ?missing, "Packets missing during decoding, scaffold intact");

        Ok(DecodeOutcome::Incomplete { missing, scaffold: scaffold_path })
    }

    /// Patches one previously missing pid into the in-progress output
    pub fn decode_late(&mut self, pid: u64) -> Result<LateOutcome> {
        if self.record.is_none() {
            warn!(pid, "late decode before the init unit was read, reading it now");
        }
        let record = self.ensure_init()?;

        let payload = match self.read_unit(pid)? {
            Some(packet) => packet.into_payload(),
            None => {
                warn!(pid, "Packet not found, it may not have arrived yet");
                return Ok(LateOutcome::NotFound);
            }
        };

        let scaffold_path = self.scaffold_path()?;
        let mut scaffold = Scaffold::open(&scaffold_path)?;
        if !scaffold.fill(pid, &payload)? {
            return Err(Error::format(format!(
                "pid {} lies beyond the {} byte scaffold",
                pid,
                scaffold.len()
            )));
        }
        scaffold.sync()?;
        drop(scaffold);
        debug!(pid, "slot patched");

        let ledger_path = self.ledger_path()?;
        let mut ledger = match Ledger::load(&ledger_path)? {
            Some(ledger) => ledger,
            None => {
                warn!(path = %ledger_path.display(), "no ledger, cannot tell whether the file is complete");
                return Ok(LateOutcome::Patched { remaining: Vec::new() });
            }
        };

        ledger.missing.remove(&pid);
        if ledger.is_empty() {
            let final_path = self.final_path()?;
            self.promote(&scaffold_path, &final_path, &ledger_path, record.packet_count)?;
            info!(path = %final_path.display(), "last gap filled, file complete");
            return Ok(LateOutcome::Completed { path: final_path });
        }

        ledger.save(&ledger_path)?;
        Ok(LateOutcome::Patched { remaining: ledger.missing.into_iter().collect() })
    }

    /// Looks up one pid. A missing or unreadable unit is a gap when a later unit
    /// exists or the init record says more packets were sent.
    ///
    /// Only a pid at or past the declared packet count can end the stream, so
    /// losing the trailing units of a transmission leaves the decode incomplete
    /// with those pids in the ledger instead of a silently short file.
    pub fn lookup(&self, pid: u64, record: &InitRecord) -> Result<Lookup> {
        match self.read_unit(pid) {
            Ok(Some(packet)) => return Ok(Lookup::Found(packet.into_payload())),
            Ok(None) => {}
            Err(e) => warn!(pid, error = %e, "Could not open packet for reading"),
        }

        if pid < record.packet_count || self.store.contains(UnitId::Data(pid + 1))? {
            Ok(Lookup::Gap)
        } else {
            Ok(Lookup::EndOfStream)
        }
    }

    fn read_unit(&self, pid: u64) -> Result<Option<Packet>> {
        let frame = match self.store.get(UnitId::Data(pid))? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let packet = Packet::from_frame(&frame)?;
        if packet.sequence() != pid {
            warn!(pid, header_pid = packet.sequence(), "unit name and header pid disagree");
        }
        Ok(Some(packet))
    }

    fn ensure_init(&mut self) -> Result<InitRecord> {
        match &self.record {
            Some(record) => Ok(record.clone()),
            None => self.init().cloned(),
        }
    }

    fn sibling(&self, extension: &str) -> Result<PathBuf> {
        let mut path = self.final_path()?.into_os_string();
        path.push(".");
        path.push(extension);
        Ok(PathBuf::from(path))
    }

    fn promote(&mut self, scaffold: &Path, final_path: &Path, ledger: &Path, units: u64) -> Result<()> {
        fs::rename(scaffold, final_path).map_err(|e| {
            Error::storage(format!(
                "Failed to promote {} to {}: {}",
                scaffold.display(),
                final_path.display(),
                e
            ))
        })?;
        Ledger::discard(ledger)?;

        if self.destructive {
            self.store.remove(UnitId::Init)?;
            for pid in 0..units {
                self.store.remove(UnitId::Data(pid))?;
            }
            debug!(units, "consumed units removed");
        }
        Ok(())
    }
}

/// Keeps only the last path component of a name received over the link
fn safe_file_name(name: &str) -> Result<String> {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::format(format!("init record file name {:?} is unusable", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::Encoder;
    use crate::core::FILL_BYTE;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn encoded(name: &str, data: &[u8]) -> MemoryStore {
        let mut encoder = Encoder::new(name, MemoryStore::new());
        encoder.encode_stream(name, data).unwrap();
        encoder.into_store()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_destination_parsing() {
        let dir = TempDir::new().unwrap();
        let d = Destination::from_path(dir.path());
        assert_eq!(d.name, None);

        let d = Destination::from_path(Path::new("out/"));
        assert_eq!(d, Destination { dir: PathBuf::from("out/"), name: None });

        let d = Destination::from_path(Path::new("out/file.bin"));
        assert_eq!(d.dir, PathBuf::from("out"));
        assert_eq!(d.name.as_deref(), Some("file.bin"));
    }

    #[test]
    fn test_complete_decode() {
        let dir = TempDir::new().unwrap();
        let data = sample(500);
        let mut decoder = Decoder::new(dir.path(), encoded("a.bin", &data));

        let outcome = decoder.run().unwrap();
        let path = dir.path().join("a.bin");
        assert_eq!(outcome, DecodeOutcome::Complete { path: path.clone(), size: 500 });
        assert_eq!(fs::read(&path).unwrap(), data);
        assert!(!decoder.scaffold_path().unwrap().exists());
        assert!(!decoder.ledger_path().unwrap().exists());
    }

    #[test]
    fn test_explicit_output_name() {
        let dir = TempDir::new().unwrap();
        let data = sample(80);
        let target = dir.path().join("renamed.dat");
        let mut decoder = Decoder::new(&target, encoded("a.bin", &data));
        assert!(decoder.run().unwrap().is_complete());
        assert_eq!(fs::read(&target).unwrap(), data);
    }

    #[test]
    fn test_gap_then_late_packet() {
        let dir = TempDir::new().unwrap();
        let data = sample(77 * 6);
        let mut store = encoded("gap.bin", &data);
        let unit3 = store.get(UnitId::Data(3)).unwrap().unwrap();
        store.remove(UnitId::Data(3)).unwrap();

        let mut decoder = Decoder::new(dir.path(), store);
        let outcome = decoder.run().unwrap();
        let scaffold_path = dir.path().join("gap.bin.scaff");
        assert_eq!(
            outcome,
            DecodeOutcome::Incomplete { missing: vec![3], scaffold: scaffold_path.clone() }
        );
        assert!(!dir.path().join("gap.bin").exists());

        let scaffold = fs::read(&scaffold_path).unwrap();
        assert!(scaffold[3 * 77..4 * 77].iter().all(|&b| b == FILL_BYTE));
        assert_eq!(&scaffold[..3 * 77], &data[..3 * 77]);
        assert_eq!(&scaffold[4 * 77..], &data[4 * 77..]);

        decoder.store_mut().put(UnitId::Data(3), &unit3).unwrap();
        let late = decoder.decode_late(3).unwrap();
        let path = dir.path().join("gap.bin");
        assert_eq!(late, LateOutcome::Completed { path: path.clone() });
        assert_eq!(fs::read(&path).unwrap(), data);
        assert!(!scaffold_path.exists());
    }

    #[test]
    fn test_consecutive_gaps() {
        let dir = TempDir::new().unwrap();
        let data = sample(77 * 8);
        let mut store = encoded("two.bin", &data);
        store.remove(UnitId::Data(2)).unwrap();
        store.remove(UnitId::Data(3)).unwrap();
        store.remove(UnitId::Data(7)).unwrap();

        let mut decoder = Decoder::new(dir.path(), store);
        match decoder.run().unwrap() {
            DecodeOutcome::Incomplete { missing, .. } => assert_eq!(missing, vec![2, 3, 7]),
            other => panic!("expected gaps, got {:?}", other),
        }
    }

    #[test]
    fn test_late_packet_keeps_remaining_gaps() {
        let dir = TempDir::new().unwrap();
        let data = sample(77 * 5);
        let mut store = encoded("late.bin", &data);
        let unit1 = store.get(UnitId::Data(1)).unwrap().unwrap();
        store.remove(UnitId::Data(1)).unwrap();
        store.remove(UnitId::Data(3)).unwrap();

        let mut decoder = Decoder::new(dir.path(), store);
        assert!(!decoder.run().unwrap().is_complete());

        decoder.store_mut().put(UnitId::Data(1), &unit1).unwrap();
        assert_eq!(decoder.decode_late(1).unwrap(), LateOutcome::Patched { remaining: vec![3] });
        assert_eq!(decoder.decode_late(3).unwrap(), LateOutcome::NotFound);

        let scaffold = fs::read(decoder.scaffold_path().unwrap()).unwrap();
        assert_eq!(&scaffold[77..154], &data[77..154]);
        assert!(scaffold[3 * 77..4 * 77].iter().all(|&b| b == FILL_BYTE));
    }

    #[test]
    fn test_late_decode_in_fresh_session() {
        let dir = TempDir::new().unwrap();
        let data = sample(77 * 4);
        let mut store = encoded("fresh.bin", &data);
        let unit2 = store.get(UnitId::Data(2)).unwrap().unwrap();
        store.remove(UnitId::Data(2)).unwrap();

        let mut first = Decoder::new(dir.path(), store.clone());
        assert!(!first.run().unwrap().is_complete());

        store.put(UnitId::Data(2), &unit2).unwrap();
        let mut second = Decoder::new(dir.path(), store);
        assert!(second.record().is_none());
        let late = second.decode_late(2).unwrap();
        assert!(matches!(late, LateOutcome::Completed { .. }));
        assert_eq!(fs::read(dir.path().join("fresh.bin")).unwrap(), data);
    }

    #[test]
    fn test_end_of_stream_is_not_a_gap() {
        let dir = TempDir::new().unwrap();
        let data = sample(200);
        let store = encoded("eos.bin", &data);
        let decoder = Decoder::new(dir.path(), store);
        let record = InitRecord::new("eos.bin", 3, 200);

        assert!(matches!(decoder.lookup(2, &record).unwrap(), Lookup::Found(_)));
        assert_eq!(decoder.lookup(3, &record).unwrap(), Lookup::EndOfStream);
    }

    #[test]
    fn test_lost_trailing_units_are_gaps() {
        let dir = TempDir::new().unwrap();
        let data = sample(77 * 5);
        let mut store = encoded("short.bin", &data);
        store.remove(UnitId::Data(3)).unwrap();
        store.remove(UnitId::Data(4)).unwrap();
        let record = InitRecord::new("short.bin", 5, 77 * 5);

        let mut decoder = Decoder::new(dir.path(), store);
        assert_eq!(decoder.lookup(4, &record).unwrap(), Lookup::Gap);
        assert_eq!(decoder.lookup(5, &record).unwrap(), Lookup::EndOfStream);
        match decoder.run().unwrap() {
            DecodeOutcome::Incomplete { missing, .. } => assert_eq!(missing, vec![3, 4]),
            other => panic!("expected trailing gaps, got {:?}", other),
        }
        assert!(!dir.path().join("short.bin").exists());
    }

    #[test]
    fn test_oversized_init_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let record = InitRecord::new("huge.bin", 4_000_000_000u64.div_ceil(77), 4_000_000_000);
        let mut store = MemoryStore::new();
        store.put(UnitId::Init, &record.to_packet().unwrap().to_frame()).unwrap();

        let mut decoder = Decoder::new(dir.path(), store);
        assert!(matches!(decoder.run(), Err(Error::Format(_))));
        assert!(!dir.path().join("huge.bin.scaff").exists());

        let mut limited = Decoder::new(dir.path(), encoded("small.bin", &sample(500))).max_file_size(499);
        assert!(matches!(limited.run(), Err(Error::Format(_))));
        let mut allowed = Decoder::new(dir.path(), encoded("small.bin", &sample(500))).max_file_size(500);
        assert!(allowed.run().unwrap().is_complete());
    }

    #[test]
    fn test_missing_init_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut store = encoded("x.bin", &sample(10));
        store.remove(UnitId::Init).unwrap();
        let mut decoder = Decoder::new(dir.path(), store);
        assert!(matches!(decoder.run(), Err(Error::Storage(_))));
    }

    #[test]
    fn test_corrupted_unit_counts_as_gap() {
        let dir = TempDir::new().unwrap();
        let data = sample(77 * 3);
        let mut store = encoded("bad.bin", &data);
        store.put(UnitId::Data(1), &[0u8; 12]).unwrap();

        let mut decoder = Decoder::new(dir.path(), store);
        match decoder.run().unwrap() {
            DecodeOutcome::Incomplete { missing, .. } => assert_eq!(missing, vec![1]),
            other => panic!("expected a gap, got {:?}", other),
        }
    }

    #[test]
    fn test_destructive_decode_removes_units() {
        let dir = TempDir::new().unwrap();
        let mut decoder = Decoder::new(dir.path(), encoded("d.bin", &sample(160))).destructive(true);
        assert!(decoder.run().unwrap().is_complete());
        assert!(decoder.store().units().unwrap().is_empty());
    }

    #[test]
    fn test_existing_output_is_replaced() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("over.bin"), b"stale contents that are longer").unwrap();
        let data = sample(5);
        let mut decoder = Decoder::new(dir.path(), encoded("over.bin", &data));
        decoder.run().unwrap();
        assert_eq!(fs::read(dir.path().join("over.bin")).unwrap(), data);
    }

    #[test]
    fn test_hostile_file_name_is_stripped() {
        assert_eq!(safe_file_name("../../etc/passwd").unwrap(), "passwd");
        assert!(safe_file_name("..").is_err());
    }

    #[test]
    fn test_empty_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut decoder = Decoder::new(dir.path(), encoded("empty.bin", &[]));
        let outcome = decoder.run().unwrap();
        assert!(outcome.is_complete());
        assert_eq!(fs::read(dir.path().join("empty.bin")).unwrap(), Vec::<u8>::new());
    }
}
