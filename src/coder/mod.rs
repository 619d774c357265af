//! File coding module
//!
//! The encoder turns a file into packet units, the decoder turns units back
//! into a file. [`Coder`] selects one of them for a single `run()`.

pub mod decoder;
pub mod encoder;
pub mod scaffold;

pub use self::decoder::{DecodeOutcome, Decoder, LateOutcome, Lookup};
pub use self::encoder::Encoder;
pub use self::scaffold::{Ledger, Scaffold};

use crate::core::Result;
use crate::protocol::InitRecord;
use crate::store::UnitStore;

/// Either side of the codec, chosen by the caller
pub enum Coder<S> {
    /// File to units
    Encode(Encoder<S>),
    /// Units to file
    Decode(Decoder<S>),
}

/// What a [`Coder`] run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Units written for this file
    Encoded(InitRecord),
    /// Outcome of the bulk decode
    Decoded(DecodeOutcome),
}

impl<S: UnitStore> Coder<S> {
    /// Runs the selected side to completion
    pub fn run(&mut self) -> Result<RunReport> {
        match self {
            Coder::Encode(encoder) => encoder.run().map(RunReport::Encoded),
            Coder::Decode(decoder) => decoder.run().map(RunReport::Decoded),
        }
    }
}

impl<S> From<Encoder<S>> for Coder<S> {
    fn from(encoder: Encoder<S>) -> Self {
        Coder::Encode(encoder)
    }
}

impl<S> From<Decoder<S>> for Coder<S> {
    fn from(decoder: Decoder<S>) -> Self {
        Coder::Decode(decoder)
    }
}
