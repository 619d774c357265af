use serde::{Serialize, Deserialize};

use crate::core::{Error, OpCode, Result, DATA_SIZE, MAX_ID};
use super::packet::Packet;

/// Contents of the init packet: what the data units reassemble into
///
/// Carried as the space-delimited text `"<name> <packet count> <size>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRecord {
    /// Base name of the original file
    pub file_name: String,
    /// Number of data packets built by the encoder
    pub packet_count: u64,
    /// Size of the original file in bytes
    pub file_size: u64,
}

impl InitRecord {
    /// Creates a new record
    pub fn new(file_name: impl Into<String>, packet_count: u64, file_size: u64) -> Self {
        InitRecord {
            file_name: file_name.into(),
            packet_count,
            file_size,
        }
    }

    /// Renders the text payload
    pub fn to_payload(&self) -> Vec<u8> {
        format!("{} {} {}", self.file_name, self.packet_count, self.file_size).into_bytes()
    }

    /// Parses the text payload. The name is everything before the last two
    /// fields, so names containing spaces survive.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| Error::format(format!("init payload is not UTF-8: {}", e)))?;
        let mut fields = text.trim_end_matches(char::from(0)).rsplitn(3, ' ');

        let file_size = fields.next().unwrap_or_default();
        let packet_count = fields.next().unwrap_or_default();
        let file_name = fields.next().unwrap_or_default();

        if file_name.is_empty() {
            return Err(Error::format(format!("init payload {:?} has no file name", text)));
        }

        let packet_count = packet_count
            .parse::<u64>()
            .map_err(|_| Error::format(format!("invalid packet count {:?}", packet_count)))?;
        let file_size = file_size
            .parse::<u64>()
            .map_err(|_| Error::format(format!("invalid file size {:?}", file_size)))?;

        Ok(InitRecord::new(file_name, packet_count, file_size))
    }

    /// Number of data packets a file of `file_size` bytes splits into
    pub fn expected_packets(&self) -> u64 {
        self.file_size.div_ceil(DATA_SIZE as u64)
    }

    /// Checks that the packet count matches the file size and fits the pid space
    pub fn validate(&self) -> Result<()> {
        if self.packet_count > MAX_ID {
            return Err(Error::format(format!(
                "init record claims {} packets, more than a stream can carry",
                self.packet_count
            )));
        }
        if self.packet_count != self.expected_packets() {
            return Err(Error::format(format!(
                "init record claims {} packets for {} bytes, expected {}",
                self.packet_count,
                self.file_size,
                self.expected_packets()
            )));
        }
        Ok(())
    }

    /// Builds the init packet carrying this record
    pub fn to_packet(&self) -> Result<Packet> {
        Packet::init(self.to_payload())
    }

    /// Extracts the record from a parsed init packet
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.op_code() != OpCode::Init {
            return Err(Error::format(format!(
                "expected an init packet, got {:?}",
                packet.op_code()
            )));
        }
        Self::parse(packet.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_text() {
        let record = InitRecord::new("a.bin", 3, 200);
        assert_eq!(record.to_payload(), b"a.bin 3 200".to_vec());
        assert_eq!(InitRecord::parse(b"a.bin 3 200").unwrap(), record);
    }

    #[test]
    fn test_packet_roundtrip() {
        let record = InitRecord::new("a.bin", 3, 200);
        let frame = record.to_packet().unwrap().to_frame();
        let packet = Packet::from_frame(&frame).unwrap();
        assert_eq!(packet.op_code(), OpCode::Init);
        assert_eq!(packet.pid(), 0);
        assert_eq!(InitRecord::from_packet(&packet).unwrap(), record);
    }

    #[test]
    fn test_name_with_spaces() {
        let record = InitRecord::new("flight log 2.txt", 12, 900);
        assert_eq!(InitRecord::parse(&record.to_payload()).unwrap(), record);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(InitRecord::parse(b"").is_err());
        assert!(InitRecord::parse(b"3 200").is_err());
        assert!(InitRecord::parse(b"a.bin three 200").is_err());
        assert!(InitRecord::parse(b"a.bin 3 -1").is_err());
        assert!(InitRecord::parse(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_validate_packet_count() {
        assert!(InitRecord::new("a.bin", 3, 200).validate().is_ok());
        assert!(InitRecord::new("empty", 0, 0).validate().is_ok());
        assert!(InitRecord::new("a.bin", 3, 231).validate().is_ok());
        assert!(InitRecord::new("a.bin", 3, 232).validate().is_err());
        assert!(InitRecord::new("a.bin", 9, 200).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_count_past_pid_space() {
        let size = (MAX_ID + 1) * DATA_SIZE as u64;
        let record = InitRecord::new("big", MAX_ID + 1, size);
        assert!(matches!(record.validate(), Err(Error::Format(_))));

        let size = MAX_ID * DATA_SIZE as u64;
        assert!(InitRecord::new("big", MAX_ID, size).validate().is_ok());
    }

    #[test]
    fn test_record_too_long_for_one_packet() {
        let record = InitRecord::new("x".repeat(80), 1, 1);
        assert!(matches!(record.to_packet(), Err(Error::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_data_packet_is_not_init() {
        let packet = crate::protocol::PidSequencer::new()
            .build(b"a.bin 3 200".to_vec(), 0, OpCode::Data)
            .unwrap();
        assert!(InitRecord::from_packet(&packet).is_err());
    }
}
