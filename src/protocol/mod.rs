//! Protocol implementation module
//!
//! This module defines the QUIP frame format: packet construction and parsing,
//! the triple-redundant majority vote, the init record and the link codec.

pub mod codec;
pub mod metadata;
pub mod packet;
pub mod vote;

pub use self::codec::FrameCodec;
pub use self::metadata::InitRecord;
pub use self::packet::{Packet, PacketHeader, PidSequencer};
pub use self::vote::{expand, majority_vote, resolve_expansion, Vote};
