use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::core::{Error, OpCode, Result, DATA_SIZE};
use crate::protocol::{InitRecord, Packet, PidSequencer};
use crate::store::{UnitId, UnitStore};

/// Fragments a file into QUIP packets and persists each one as a unit
///
/// Data units are written in pid order; the last one is rewritten with the
/// terminal op code once the source runs dry. The init unit goes last because
/// its packet count is only known then.
pub struct Encoder<S> {
    source: PathBuf,
    store: S,
    destructive: bool,
}

impl<S: UnitStore> Encoder<S> {
    /// Creates an encoder for `source`, writing units to `store`
    pub fn new(source: impl Into<PathBuf>, store: S) -> Self {
        Encoder {
            source: source.into(),
            store,
            destructive: false,
        }
    }

    /// Delete the source after success, and partial units after failure
    pub fn destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    /// File being encoded
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Unit store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consumes the encoder, returning its store
    pub fn into_store(self) -> S {
        self.store
    }

    /// Encodes the source file
    pub fn run(&mut self) -> Result<InitRecord> {
        let file_name = self
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::config(format!("{} does not name a file", self.source.display()))
            })?;

        let file = fs::File::open(&self.source).map_err(|e| {
            Error::storage(format!("Can not open {}: {}", self.source.display(), e))
        })?;

        let record = self.encode_stream(&file_name, BufReader::new(file))?;

        if self.destructive {
            fs::remove_file(&self.source).map_err(|e| {
                Error::storage(format!("Failed to remove {}: {}", self.source.display(), e))
            })?;
            debug!(path = %self.source.display(), "source removed");
        }

        Ok(record)
    }

    /// Encodes any byte stream under the given file name
    pub fn encode_stream<R: Read>(&mut self, file_name: &str, mut reader: R) -> Result<InitRecord> {
        info!(file = file_name, "Beginning to encode file into packets");

        let mut sequencer = PidSequencer::new();
        let (packet_count, file_size) = match self.write_data_units(&mut reader, &mut sequencer) {
            Ok(totals) => totals,
            Err(e) => {
                error!(error = %e, next_pid = sequencer.next_pid(), "All packets could not be created");
                if self.destructive {
                    self.discard(sequencer.next_pid());
                }
                return Err(e);
            }
        };
        info!(packets = packet_count, bytes = file_size, "Finished encoding file into packets");

        let record = InitRecord::new(file_name, packet_count, file_size);
        if let Err(e) = self.write_init(&record) {
            error!(error = %e, "Could not write the initialization packet");
            if self.destructive {
                self.discard(packet_count);
            }
            return Err(e);
        }

        Ok(record)
    }

    fn write_data_units<R: Read>(
        &mut self,
        reader: &mut R,
        sequencer: &mut PidSequencer,
    ) -> Result<(u64, u64)> {
        let mut last: Option<(u64, Packet)> = None;
        let mut file_size = 0u64;
        let mut chunk = Vec::with_capacity(DATA_SIZE);

        loop {
            chunk.clear();
            let read = (&mut *reader).take(DATA_SIZE as u64).read_to_end(&mut chunk)?;
            if read == 0 {
                break;
            }
            file_size += read as u64;

            let pid = sequencer.next_pid();
            let packet = sequencer.build(chunk.as_slice(), pid, OpCode::Data)?;
            self.persist(UnitId::Data(pid), &packet)?;
            last = Some((pid, packet));
        }

        match last {
            Some((pid, mut packet)) => {
                packet.mark_terminal()?;
                self.persist(UnitId::Data(pid), &packet)?;
            }
            None => warn!("source is empty, no data packets built"),
        }

        Ok((sequencer.next_pid(), file_size))
    }

    fn write_init(&mut self, record: &InitRecord) -> Result<()> {
        debug!(record = ?record, "Creating initialization packet");
        let packet = record
            .to_packet()
            .map_err(|e| Error::finalize(format!("init record does not fit: {}", e)))?;
        self.store
            .put(UnitId::Init, &packet.to_frame())
            .map_err(|e| Error::finalize(e.to_string()))
    }

    fn persist(&mut self, unit: UnitId, packet: &Packet) -> Result<()> {
        self.store.put(unit, &packet.to_frame())?;
        debug!(unit = %unit, op_code = ?packet.op_code(), "unit written");
        Ok(())
    }

    /// Best-effort removal of data units `0..count`
    fn discard(&mut self, count: u64) {
        for pid in 0..count {
            if let Err(e) = self.store.remove(UnitId::Data(pid)) {
                warn!(pid, error = %e, "could not discard partial unit");
            }
        }
    }
}
