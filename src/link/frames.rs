use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use crate::core::{OpCode, Result};
use crate::protocol::{FrameCodec, Packet};
use crate::store::{UnitId, UnitStore};
use super::transport::Transport;

/// Attempts made to store one received frame
const STORE_ATTEMPTS: usize = 2;

/// Tally of one ingest pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Frames written to the store
    pub stored: usize,
    /// Control frames, which have no unit
    pub skipped: usize,
    /// Frames whose header could not be read
    pub rejected: usize,
    /// Bytes dropped while looking for frame starts
    pub discarded_bytes: usize,
    /// Units that could not be written
    pub failed: Vec<UnitId>,
}

/// Splits a received buffer into frames and stores each under the unit its
/// header names. Arrival order does not matter.
pub fn ingest<S: UnitStore + ?Sized>(buffer: &[u8], store: &mut S) -> Result<IngestReport> {
    let mut codec = FrameCodec::new();
    let mut src = BytesMut::from(buffer);
    let mut report = IngestReport::default();

    while let Some(frame) = codec.decode_eof(&mut src)? {
        let packet = match Packet::from_frame(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "rejecting unreadable frame");
                report.rejected += 1;
                continue;
            }
        };

        let unit = match packet.op_code() {
            OpCode::Init => UnitId::Init,
            OpCode::Data | OpCode::Terminal => UnitId::Data(packet.sequence()),
            OpCode::Control(code) => {
                debug!(code, "control frame, not stored");
                report.skipped += 1;
                continue;
            }
        };

        let mut stored = false;
        for attempt in 1..=STORE_ATTEMPTS {
            match store.put(unit, &frame) {
                Ok(()) => {
                    stored = true;
                    break;
                }
                Err(e) => warn!(unit = %unit, attempt, error = %e, "could not store frame"),
            }
        }
        if stored {
            debug!(unit = %unit, "frame stored");
            report.stored += 1;
        } else {
            report.failed.push(unit);
        }
    }

    report.discarded_bytes = codec.skipped();
    info!(
        stored = report.stored,
        skipped = report.skipped,
        rejected = report.rejected,
        failed = report.failed.len(),
        "received frames ingested"
    );
    Ok(report)
}

/// Sends stored units over the link in the order given. Units missing from
/// the store are skipped; returns how many were sent.
pub fn transmit_units<S, T>(store: &S, transport: &mut T, units: &[UnitId]) -> Result<usize>
where
    S: UnitStore + ?Sized,
    T: Transport + ?Sized,
{
    let mut codec = FrameCodec::new();
    let mut out = BytesMut::new();
    let mut sent = 0;

    for &unit in units {
        let frame = match store.get(unit)? {
            Some(frame) => frame,
            None => {
                warn!(unit = %unit, "requested unit not in store");
                continue;
            }
        };
        let packet = Packet::from_frame(&frame)?;
        out.clear();
        codec.encode(&packet, &mut out)?;
        transport.write_all(&out)?;
        debug!(unit = %unit, "unit transmitted");
        sent += 1;
    }

    Ok(sent)
}
