use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::{Error, Result};
use super::transport::{LineStatus, Transport};

/// Accumulates one transmission from the link
///
/// Polls the transport every `poll_interval` until the remote end drops its
/// transmission line or `shutdown` turns true. `fault_tolerance` consecutive
/// FIFO faults abort the cycle, as does ending with nothing received.
pub async fn collect<T: Transport + ?Sized>(
    transport: &mut T,
    shutdown: &mut watch::Receiver<bool>,
    poll_interval: Duration,
    fault_tolerance: u32,
) -> Result<BytesMut> {
    let mut buffer = BytesMut::new();
    let mut faults = 0u32;

    loop {
        if *shutdown.borrow() {
            info!(bytes = buffer.len(), "shutdown requested, receive cycle stopped");
            break;
        }

        match transport.poll_status()? {
            LineStatus::DataReady(waiting) => {
                let read = transport.read_into(&mut buffer, waiting)?;
                debug!(read, total = buffer.len(), "bytes received");
                faults = 0;
            }
            LineStatus::FifoError => {
                faults += 1;
                warn!(faults, "FIFO data error on the link");
                if faults >= fault_tolerance {
                    return Err(Error::stream("The FIFO could not be read"));
                }
            }
            LineStatus::Idle => {}
        }

        if !transport.transmission_active()? {
            debug!(bytes = buffer.len(), "remote end finished transmitting");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    debug!("shutdown channel closed, receive cycle stopped");
                    break;
                }
            }
        }
    }

    if buffer.is_empty() {
        return Err(Error::stream("Buffer is empty, no data received"));
    }
    Ok(buffer)
}
