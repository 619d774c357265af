use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::core::{Error, FRAME_SIZE, START_WORD, SYNC_WORD};
use super::packet::Packet;

/// Frame preamble: sync word followed by start word
const PREAMBLE: [u8; 4] = {
    let sync = SYNC_WORD.to_be_bytes();
    let start = START_WORD.to_be_bytes();
    [sync[0], sync[1], start[0], start[1]]
};

/// Splits a raw link byte stream into 256-byte QUIP frames
///
/// Frames are yielded raw so they can be stored as received; parse them with
/// [`Packet::from_frame`]. A preamble with one damaged byte, or one followed
/// by an intact preamble exactly a frame later, still starts a frame. Other
/// bytes are skipped until the next intact preamble.
#[derive(Clone, Default)]
pub struct FrameCodec {
    skipped: usize,
}

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec::default()
    }

    /// Bytes discarded while resynchronising
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn discard(&mut self, src: &mut BytesMut, count: usize) {
        if count > 0 {
            warn!(count, "discarding bytes before frame preamble");
            src.advance(count);
            self.skipped += count;
        }
    }
}

/// Whether `src` starts a frame whose preamble took some corruption in transit
fn damaged_frame_start(src: &[u8]) -> bool {
    let damaged = src[..PREAMBLE.len()]
        .iter()
        .zip(PREAMBLE.iter())
        .filter(|(got, want)| got != want)
        .count();
    if damaged <= 1 {
        return true;
    }
    src.get(FRAME_SIZE..FRAME_SIZE + PREAMBLE.len()) == Some(&PREAMBLE[..])
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PREAMBLE.len() {
            // Need more data to check the preamble
            return Ok(None);
        }

        let intact = src[..PREAMBLE.len()] == PREAMBLE;
        if !intact && !damaged_frame_start(src) {
            match src.windows(PREAMBLE.len()).position(|w| w == PREAMBLE) {
                Some(offset) => self.discard(src, offset),
                None => {
                    // Keep a possible partial preamble at the tail
                    let keep = PREAMBLE.len() - 1;
                    let count = src.len() - keep;
                    self.discard(src, count);
                    return Ok(None);
                }
            }
            return self.decode(src);
        }

        if src.len() < FRAME_SIZE {
            // Need more data to read the full frame
            return Ok(None);
        }

        if !intact {
            warn!(preamble = ?&src[..PREAMBLE.len()], "frame preamble damaged, keeping frame");
        }
        Ok(Some(src.split_to(FRAME_SIZE).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    let count = src.len();
                    warn!(count, "dropping truncated frame at end of stream");
                    self.skipped += count;
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_frame(dst);
        Ok(())
    }
}

impl Encoder<&Packet> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_frame(dst);
        Ok(())
    }
}
