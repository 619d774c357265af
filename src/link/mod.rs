//! Serial link to the companion controller
//!
//! Everything between the raw byte link and the unit store: the transport,
//! the polling receive loop, command routing, frame ingest and transmission,
//! and the [`Interpreter`] worker that ties them together.

pub mod command;
pub mod frames;
pub mod interpreter;
pub mod receive;
pub mod transport;

pub use self::command::{
    dispatch, route, Command, CommandCode, CommandContext, CommandHandler, PacketCommands, Routed,
};
pub use self::frames::{ingest, transmit_units, IngestReport};
pub use self::interpreter::{Cycle, Interpreter, Signals};
pub use self::receive::collect;
pub use self::transport::{LineStatus, LinkEvent, MemoryTransport, SerialTransport, Transport};
