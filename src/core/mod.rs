//! Core types and constants for the QUIP protocol
//!
//! This module contains the fundamental building blocks used throughout the library:
//! the fixed frame geometry, the error type and the shared configuration.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    Config,
    OpCode,
    SerialConfig,
};

/// Frame alignment marker, at the start of the frame and at the end of the footer
pub const SYNC_WORD: u16 = 0xFFFF;

/// Marks the start of the header body
pub const START_WORD: u16 = 0xABCD;

/// Marks the end of the payload region
pub const END_WORD: u16 = 0xDCBA;

/// Total serialized frame size in bytes
pub const FRAME_SIZE: usize = 256;

/// Maximum application bytes carried by one packet
pub const DATA_SIZE: usize = 77;

/// Pid arithmetic is modulo this value
pub const MAX_ID: u64 = 0xFFFF_FFFF;

/// Padding byte used to fill frames, and the placeholder fill for missing scaffold slots
pub const FILL_BYTE: u8 = 0xFF;

/// Number of redundant copies for every TMR-protected region
pub const TMR_COPIES: usize = 3;

/// Size of one `(pid, flags)` header tail
pub const HEADER_TAIL_SIZE: usize = 5;

/// Offset of the TMR-protected header tail
pub const HEADER_TAIL_OFFSET: usize = 4;

/// Offset of the TMR-protected payload region
pub const PAYLOAD_OFFSET: usize = HEADER_TAIL_OFFSET + HEADER_TAIL_SIZE * TMR_COPIES;

/// Size of the footer (end word + sync word)
pub const FOOTER_SIZE: usize = 4;

/// Largest file a decoder accepts from an init record unless configured otherwise
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;
