use std::fmt;

use super::{ProtocolError, Result};

pub const FRAME_LEN: usize = 5;

/// Leading command byte of every outbound frame
pub mod command {
    /// Status report for devices within an address window
    pub const RANGE_REQUEST: u8 = 0x10;
    /// Assign the address of an AM1 device
    pub const WRITE_SINGLE: u8 = 0x20;
    /// Assign the address of one AM8 channel
    pub const WRITE_OCTAL: u8 = 0x21;
    /// Assign the address of one PM channel
    pub const WRITE_QUAD: u8 = 0x22;
    /// Bus-wide discovery
    pub const SCAN: u8 = 0x30;
}

/// Outbound command frame: command byte, two parameter bytes and a
/// two byte XOR checksum (low byte first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    command: u8,
    param_a: u8,
    param_b: u8,
    checksum_low: u8,
    checksum_high: u8,
}

impl Frame {
    fn with_params(command: u8, param_a: u8, param_b: u8) -> Self {
        let checksum = (command ^ param_a ^ param_b) as u16;
        Self {
            command,
            param_a,
            param_b,
            checksum_low: (checksum & 0xFF) as u8,
            checksum_high: (checksum >> 8) as u8,
        }
    }

    /// Ask every device with an address in `start..=end` to report.
    /// Only the low byte of each bound goes on the wire.
    pub fn range_request(command: u8, start: u16, end: u16) -> Self {
        Self::with_params(command, (start & 0xFF) as u8, (end & 0xFF) as u8)
    }

    /// Assign `new_address` to channel `index` of the addressed device.
    pub fn single_write(command: u8, index: u8, new_address: u8) -> Self {
        Self::with_params(command, index, new_address)
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn param_a(&self) -> u8 {
        self.param_a
    }

    pub fn param_b(&self) -> u8 {
        self.param_b
    }

    pub fn checksum(&self) -> u16 {
        u16::from_le_bytes([self.checksum_low, self.checksum_high])
    }

    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        [
            self.command,
            self.param_a,
            self.param_b,
            self.checksum_low,
            self.checksum_high,
        ]
    }

    /// Lowercase hex text as transmitted, ten characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode a transmitted frame and verify its checksum.
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| ProtocolError::malformed(text, format!("invalid hex: {}", e)))?;
        if bytes.len() != FRAME_LEN {
            return Err(ProtocolError::malformed(
                text,
                format!("expected {} bytes, got {}", FRAME_LEN, bytes.len()),
            ));
        }
        let frame = Self::with_params(bytes[0], bytes[1], bytes[2]);
        if frame.checksum_low != bytes[3] || frame.checksum_high != bytes[4] {
            return Err(ProtocolError::malformed(text, "checksum mismatch"));
        }
        Ok(frame)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
