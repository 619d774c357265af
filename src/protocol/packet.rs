use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::core::{
    Error, OpCode, Result, DATA_SIZE, END_WORD, FILL_BYTE, FOOTER_SIZE, FRAME_SIZE,
    HEADER_TAIL_OFFSET, HEADER_TAIL_SIZE, MAX_ID, PAYLOAD_OFFSET, START_WORD, SYNC_WORD,
    TMR_COPIES,
};
use super::vote::{self, majority_vote, majority_vote_sized};

const OVERFLOW_BIT: u8 = 0x80;
const OP_CODE_SHIFT: u8 = 4;
const OP_CODE_MASK: u8 = 0x07;

/// The TMR-protected part of the header: pid and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Wire pid, already reduced modulo `MAX_ID`
    pub pid: u32,
    /// Set once the pid counter has wrapped
    pub overflow: bool,
    /// Operation code
    pub op_code: OpCode,
}

impl PacketHeader {
    /// Flags byte: overflow in bit 7, op code in bits 6-4, bits 3-0 reserved
    pub fn flags(&self) -> u8 {
        let overflow = if self.overflow { OVERFLOW_BIT } else { 0 };
        overflow | (self.op_code.bits() << OP_CODE_SHIFT)
    }

    /// Returns one `(pid, flags)` tail
    pub fn encode(&self) -> [u8; HEADER_TAIL_SIZE] {
        let pid = self.pid.to_be_bytes();
        [pid[0], pid[1], pid[2], pid[3], self.flags()]
    }

    /// Recovers the header from its three redundant tails
    pub fn decode(tails: &[u8]) -> Result<Self> {
        if tails.len() < HEADER_TAIL_SIZE * TMR_COPIES {
            return Err(Error::format(format!(
                "header tail needs {} bytes, got {}",
                HEADER_TAIL_SIZE * TMR_COPIES,
                tails.len()
            )));
        }

        let vote = majority_vote_sized(tails, HEADER_TAIL_SIZE);
        if !vote.is_clean() {
            warn!(unresolved = vote.unresolved, "header tail copies disagree, using first copy");
        }

        let tail = &vote.data;
        let pid = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let flags = tail[4];

        Ok(PacketHeader {
            pid,
            overflow: flags & OVERFLOW_BIT != 0,
            op_code: OpCode::from_bits((flags >> OP_CODE_SHIFT) & OP_CODE_MASK)?,
        })
    }
}

/// One QUIP frame
///
/// Packets are immutable once built, except for [`Packet::mark_terminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl Packet {
    /// Builds an init or control packet; these always carry pid 0.
    pub fn unsequenced(op_code: OpCode, payload: impl Into<Vec<u8>>) -> Result<Self> {
        if op_code.is_sequenced() {
            return Err(Error::invalid_state(format!(
                "{:?} packets need a pid sequencer",
                op_code
            )));
        }
        let payload = checked_payload(payload.into())?;
        Ok(Packet {
            header: PacketHeader { pid: 0, overflow: false, op_code },
            payload,
        })
    }

    /// Builds the metadata packet
    pub fn init(payload: impl Into<Vec<u8>>) -> Result<Self> {
        Self::unsequenced(OpCode::Init, payload)
    }

    /// Wire pid
    pub fn pid(&self) -> u32 {
        self.header.pid
    }

    /// Logical sequence number, accounting for one wraparound
    pub fn sequence(&self) -> u64 {
        let base = if self.header.overflow { MAX_ID } else { 0 };
        base + u64::from(self.header.pid)
    }

    /// Operation code
    pub fn op_code(&self) -> OpCode {
        self.header.op_code
    }

    /// Overflow flag
    pub fn overflow(&self) -> bool {
        self.header.overflow
    }

    /// Decoded header
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Application bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the packet, returning its payload
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Rewrites a data packet as the last one of its stream
    pub fn mark_terminal(&mut self) -> Result<()> {
        if !self.header.op_code.is_sequenced() {
            return Err(Error::invalid_state(format!(
                "cannot mark a {:?} packet as terminal",
                self.header.op_code
            )));
        }
        self.header.op_code = OpCode::Terminal;
        Ok(())
    }

    /// Appends the 256-byte frame to `dst`
    pub fn write_frame(&self, dst: &mut BytesMut) {
        let start = dst.len();
        dst.reserve(FRAME_SIZE);

        dst.put_u16(SYNC_WORD);
        dst.put_u16(START_WORD);
        let tail = self.header.encode();
        for _ in 0..TMR_COPIES {
            dst.put_slice(&tail);
        }
        dst.put_slice(&vote::expand(&self.payload));
        dst.put_u16(END_WORD);
        dst.put_u16(SYNC_WORD);

        dst.resize(start + FRAME_SIZE, FILL_BYTE);
    }

    /// Serializes the packet into its 256-byte frame
    pub fn to_frame(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(FRAME_SIZE);
        self.write_frame(&mut dst);
        dst.freeze()
    }

    /// Parses a frame, recovering header and payload by majority vote
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() != FRAME_SIZE {
            return Err(Error::format(format!(
                "frame must be {} bytes, got {}",
                FRAME_SIZE,
                frame.len()
            )));
        }

        let sync = u16::from_be_bytes([frame[0], frame[1]]);
        let start = u16::from_be_bytes([frame[2], frame[3]]);
        if sync != SYNC_WORD || start != START_WORD {
            warn!(sync, start, "frame preamble corrupted");
        }

        let header = PacketHeader::decode(&frame[HEADER_TAIL_OFFSET..PAYLOAD_OFFSET])?;
        let end = payload_end(frame)?;
        let vote = majority_vote(&frame[PAYLOAD_OFFSET..end]);
        if vote.corrected > 0 || !vote.is_clean() {
            debug!(
                pid = header.pid,
                corrected = vote.corrected,
                unresolved = vote.unresolved,
                "payload repaired by vote"
            );
        }

        Ok(Packet {
            header,
            payload: vote.data,
        })
    }
}

/// Session-owned pid state for a stream of data packets
#[derive(Debug, Clone, Default)]
pub struct PidSequencer {
    last: Option<u64>,
}

impl PidSequencer {
    /// Creates a sequencer expecting pid 0 next
    pub fn new() -> Self {
        PidSequencer::default()
    }

    /// The pid the next data packet must carry
    pub fn next_pid(&self) -> u64 {
        self.last.map_or(0, |pid| pid + 1)
    }

    /// Last data pid admitted
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Whether the counter has passed `MAX_ID`
    pub fn wrapped(&self) -> bool {
        self.last.map_or(false, |pid| pid >= MAX_ID)
    }

    /// Builds a packet, enforcing pid order for data and terminal packets.
    ///
    /// A failed call leaves the sequencer untouched.
    pub fn build(&mut self, payload: impl Into<Vec<u8>>, pid: u64, op_code: OpCode) -> Result<Packet> {
        let payload = checked_payload(payload.into())?;

        if !op_code.is_sequenced() {
            return Ok(Packet {
                header: PacketHeader { pid: 0, overflow: self.wrapped(), op_code },
                payload,
            });
        }

        let expected = self.next_pid();
        if pid != expected {
            return Err(Error::PidOutOfOrder { expected, got: pid });
        }
        self.last = Some(pid);

        Ok(Packet {
            header: PacketHeader {
                pid: (pid % MAX_ID) as u32,
                overflow: pid >= MAX_ID,
                op_code,
            },
            payload,
        })
    }
}

fn checked_payload(payload: Vec<u8>) -> Result<Vec<u8>> {
    if payload.len() > DATA_SIZE {
        return Err(Error::PayloadTooLarge { len: payload.len(), max: DATA_SIZE });
    }
    Ok(payload)
}

/// Offset of the end word. The payload region before it must hold three
/// equal copies, so only offsets `PAYLOAD_OFFSET + 3n` are candidates, and
/// the last one wins since nothing after the footer can look like an end word.
fn payload_end(frame: &[u8]) -> Result<usize> {
    let end = END_WORD.to_be_bytes();
    let latest = PAYLOAD_OFFSET + TMR_COPIES * DATA_SIZE;

    (0..=DATA_SIZE)
        .rev()
        .map(|n| PAYLOAD_OFFSET + TMR_COPIES * n)
        .filter(|&p| p <= latest && p + FOOTER_SIZE <= frame.len())
        .find(|&p| frame[p..p + 2] == end)
        .ok_or_else(|| Error::format("payload end word not found"))
}
