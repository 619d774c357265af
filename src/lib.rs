//! QUIP: packet protocol for moving files over a slow, lossy serial link
//!
//! Files are cut into fixed 256-byte frames whose header and payload are sent
//! in triplicate and recovered by majority vote. The decoder tolerates missing
//! units, keeping an in-progress file until late packets fill the gaps.
pub mod core;
pub mod protocol;
pub mod store;
pub mod coder;
pub mod link;

// Re-export commonly used items
pub use crate::core::{Config, Error, Result};
pub use crate::coder::{Coder, Decoder, Encoder};
pub use crate::protocol::{InitRecord, Packet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
