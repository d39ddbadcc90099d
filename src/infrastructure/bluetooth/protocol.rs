//! Vehicle Link Protocol
//!
//! Frame codec for the serial-over-BLE channel the vehicle listens on.
//!
//! # Frame Structure
//!
//! ```text
//! <angle 0-180>;<speed 0-100>;<direction -1|0|1>\n     (standard)
//! <angle 0-180>;<speed 0-100>\n                        (legacy)
//! ```
//!
//! A frame longer than one physical write is cut into chunks of at most
//! [`MAX_CHUNK_LEN`] bytes. Chunk `i` is due `i * CHUNK_DELAY_MS` after the
//! frame was built. Inbound notifications use the same newline framing and
//! are reassembled by [`FrameDecoder`].

use crate::domain::models::VehicleCommand;
use std::time::Duration;

/// BLE UART Service UUID
pub const SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/// Write/notify characteristic on the UART service
pub const CHARACTERISTIC_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

/// Largest payload accepted by one write
pub const MAX_CHUNK_LEN: usize = 20;

/// Spacing between chunks of the same frame in milliseconds
pub const CHUNK_DELAY_MS: u64 = 100;

pub const FRAME_TERMINATOR: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// `angle;speed;direction`
    #[default]
    Standard,
    /// `angle;speed`, for receivers without a direction field
    Legacy,
}

impl WireFormat {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            Self::Legacy
        } else {
            Self::Standard
        }
    }
}

/// One physically transmittable fragment of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub bytes: Vec<u8>,
}

impl Chunk {
    /// Offset from frame construction at which this chunk is due.
    pub fn due_after(&self, spacing: Duration) -> Duration {
        spacing * self.index as u32
    }

    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Render a command without the terminator.
pub fn format_command(command: &VehicleCommand, format: WireFormat) -> String {
    match format {
        WireFormat::Standard => format!(
            "{};{};{}",
            command.steering_angle_deg,
            command.throttle_percent,
            command.direction.code()
        ),
        WireFormat::Legacy => format!(
            "{};{}",
            command.steering_angle_deg, command.throttle_percent
        ),
    }
}

/// Encode a command into ready-to-write chunks.
pub fn encode(command: &VehicleCommand, format: WireFormat) -> Vec<Chunk> {
    chunk_frame(&frame(&format_command(command, format)), MAX_CHUNK_LEN)
}

/// Append the line terminator.
pub fn frame(text: &str) -> String {
    let mut framed = String::with_capacity(text.len() + 1);
    framed.push_str(text);
    framed.push(FRAME_TERMINATOR as char);
    framed
}

/// Split a frame into chunks of at most `max_len` bytes without cutting a
/// UTF-8 sequence in half.
pub fn chunk_frame(frame: &str, max_len: usize) -> Vec<Chunk> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::with_capacity(frame.len() / max_len + 1);
    let mut start = 0;

    while start < frame.len() {
        let mut end = (start + max_len).min(frame.len());
        while end > start && !frame.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character wider than max_len goes out on its own.
            end = start + 1;
            while !frame.is_char_boundary(end) {
                end += 1;
            }
        }
        chunks.push(Chunk {
            index: chunks.len(),
            bytes: frame.as_bytes()[start..end].to_vec(),
        });
        start = end;
    }

    chunks
}

/// Reassembles newline-delimited records from arbitrarily fragmented input.
#[derive(Debug, Default, Clone)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every record completed by them.
    ///
    /// Records are trimmed; blank lines produce nothing.
    pub fn push_bytes(&mut self, incoming: &[u8]) -> Vec<String> {
        let mut records = Vec::new();
        for &byte in incoming {
            if byte == FRAME_TERMINATOR {
                let record = String::from_utf8_lossy(&self.buffer).trim().to_string();
                self.buffer.clear();
                if !record.is_empty() {
                    records.push(record);
                }
            } else {
                self.buffer.push(byte);
            }
        }
        records
    }

    pub fn push_str(&mut self, incoming: &str) -> Vec<String> {
        self.push_bytes(incoming.as_bytes())
    }

    /// Bytes received since the last terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Direction;

    fn command(angle: i32, speed: i32, direction: Direction) -> VehicleCommand {
        VehicleCommand {
            steering_angle_deg: angle,
            throttle_percent: speed,
            direction,
        }
    }

    #[test]
    fn short_command_fits_in_one_chunk() {
        let chunks = encode(&command(135, 80, Direction::Forward), WireFormat::Standard);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_text(), "135;80;1\n");
        assert_eq!(chunks[0].due_after(Duration::from_millis(CHUNK_DELAY_MS)), Duration::ZERO);
    }

    #[test]
    fn direction_codes() {
        assert_eq!(
            format_command(&command(90, 0, Direction::Brake), WireFormat::Standard),
            "90;0;0"
        );
        assert_eq!(
            format_command(&command(10, 55, Direction::Backward), WireFormat::Standard),
            "10;55;-1"
        );
        assert_eq!(
            format_command(&command(10, 55, Direction::Backward), WireFormat::Legacy),
            "10;55"
        );
    }

    #[test]
    fn long_frame_splits_at_twenty_bytes() {
        let payload = "abcdefghijklmnopqrstuvwx"; // 24 + terminator = 25
        let chunks = chunk_frame(&frame(payload), MAX_CHUNK_LEN);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].bytes.len(), 20);
        assert_eq!(chunks[1].as_text(), "uvwx\n");
        assert_eq!(
            chunks[1].due_after(Duration::from_millis(CHUNK_DELAY_MS)),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn multibyte_characters_are_never_cut() {
        let text = "ééééééééééé"; // 22 bytes
        let chunks = chunk_frame(&frame(text), MAX_CHUNK_LEN);
        assert_eq!(chunks[0].bytes.len(), 20);
        assert!(std::str::from_utf8(&chunks[0].bytes).is_ok());
        assert_eq!(chunks[1].as_text(), "é\n");
    }

    #[test]
    fn chunks_reassemble_in_one_call() {
        let text = "status: battery 7.4V temp 31C";
        let joined: Vec<u8> = chunk_frame(&frame(text), MAX_CHUNK_LEN)
            .into_iter()
            .flat_map(|c| c.bytes)
            .collect();
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push_bytes(&joined), vec![text.to_string()]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn chunks_reassemble_one_byte_at_a_time() {
        let text = "179;100;-1";
        let joined: Vec<u8> = chunk_frame(&frame(text), 4)
            .into_iter()
            .flat_map(|c| c.bytes)
            .collect();
        let mut decoder = FrameDecoder::new();
        let mut records = Vec::new();
        for byte in joined {
            records.extend(decoder.push_bytes(&[byte]));
        }
        assert_eq!(records, vec![text.to_string()]);
    }

    #[test]
    fn blank_lines_and_whitespace_are_dropped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_str("  \r\n\n").is_empty());
        assert_eq!(decoder.push_str(" ok \r\nnext"), vec!["ok".to_string()]);
        assert_eq!(decoder.pending(), b"next");
    }
}
