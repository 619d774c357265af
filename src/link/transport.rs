use std::collections::VecDeque;
use std::io::{Read, Write};

use bytes::BytesMut;
use serialport::SerialPort;
use tracing::{debug, warn};

use crate::core::{Error, Result, SerialConfig};

/// State of the receive FIFO at one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Bytes are waiting to be read
    DataReady(usize),
    /// The FIFO reported a data error
    FifoError,
    /// Nothing to read
    Idle,
}

/// Byte link to the companion controller
pub trait Transport: Send {
    /// Polls the receive FIFO
    fn poll_status(&mut self) -> Result<LineStatus>;

    /// Reads up to `len` waiting bytes onto the end of `buf`. Runs on the
    /// receive worker, so implementations must return promptly.
    fn read_into(&mut self, buf: &mut BytesMut, len: usize) -> Result<usize>;

    /// Whether the remote end is still transmitting
    fn transmission_active(&mut self) -> Result<bool>;

    /// Sends bytes to the remote end
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Serial port transport. Carrier detect stands in for the interrupt line
/// the controller holds high while it transmits.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Opens the configured serial device
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(config.device.as_str(), config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(|e| Error::connection(format!("Failed to open {}: {}", config.device, e)))?;
        debug!(device = %config.device, baud = config.baud_rate, "serial link open");
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn poll_status(&mut self) -> Result<LineStatus> {
        match self.port.bytes_to_read() {
            Ok(0) => Ok(LineStatus::Idle),
            Ok(waiting) => Ok(LineStatus::DataReady(waiting as usize)),
            Err(e) => {
                warn!(error = %e, "could not query the receive FIFO");
                Ok(LineStatus::FifoError)
            }
        }
    }

    /// Only called for bytes the FIFO already reported waiting, so the read
    /// normally returns at once. A stalled port blocks for at most
    /// `serial.timeout`, which config validation keeps within one poll interval.
    fn read_into(&mut self, buf: &mut BytesMut, len: usize) -> Result<usize> {
        let mut chunk = vec![0u8; len];
        let read = self.port.read(&mut chunk)?;
        buf.extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    fn transmission_active(&mut self) -> Result<bool> {
        self.port
            .read_carrier_detect()
            .map_err(|e| Error::connection(format!("Failed to read carrier detect: {}", e)))
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }
}

/// One scripted poll result of a [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes arrive
    Data(Vec<u8>),
    /// The FIFO reports an error
    Fault,
    /// Nothing arrives
    Idle,
}

/// In-memory transport replaying a script of link events
///
/// Transmission stays active until every event has been polled and read.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    script: VecDeque<LinkEvent>,
    pending: Vec<u8>,
    written: Vec<u8>,
}

impl MemoryTransport {
    /// Creates an empty transport
    pub fn new() -> Self {
        MemoryTransport::default()
    }

    /// Queues an event
    pub fn push(&mut self, event: LinkEvent) -> &mut Self {
        self.script.push_back(event);
        self
    }

    /// Queues incoming bytes
    pub fn push_data(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        self.push(LinkEvent::Data(data.into()))
    }

    /// Everything written to the link so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl Transport for MemoryTransport {
    fn poll_status(&mut self) -> Result<LineStatus> {
        if !self.pending.is_empty() {
            return Ok(LineStatus::DataReady(self.pending.len()));
        }
        Ok(match self.script.pop_front() {
            Some(LinkEvent::Data(data)) => {
                self.pending = data;
                LineStatus::DataReady(self.pending.len())
            }
            Some(LinkEvent::Fault) => LineStatus::FifoError,
            Some(LinkEvent::Idle) | None => LineStatus::Idle,
        })
    }

    fn read_into(&mut self, buf: &mut BytesMut, len: usize) -> Result<usize> {
        let len = len.min(self.pending.len());
        buf.extend_from_slice(&self.pending[..len]);
        self.pending.drain(..len);
        Ok(len)
    }

    fn transmission_active(&mut self) -> Result<bool> {
        Ok(!self.script.is_empty() || !self.pending.is_empty())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }
}
