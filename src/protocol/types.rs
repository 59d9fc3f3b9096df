use std::fmt;

use serde::{Deserialize, Serialize};

/// Lowest assignable bus address
pub const DEVICE_ADDRESS_MIN: u8 = 1;
/// Highest assignable bus address
pub const DEVICE_ADDRESS_MAX: u8 = 247;
/// Highest address covered by a discovery scan
pub const SCAN_ADDRESS_MAX: u8 = 127;

/// Outstanding request classes, one wait-flag each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestKind {
    SingleRange,
    OctalRange,
    QuadRange,
    QuadWrite,
    Scan,
}

impl RequestKind {
    /// Order in which armed kinds claim an inbound line.
    pub const PRIORITY: [RequestKind; 5] = [
        RequestKind::SingleRange,
        RequestKind::OctalRange,
        RequestKind::QuadRange,
        RequestKind::QuadWrite,
        RequestKind::Scan,
    ];

    /// Whether a pending request of this kind drives the busy indicator.
    /// The Quad write echo only refreshes display state in the background.
    pub fn holds_busy(&self) -> bool {
        !matches!(self, RequestKind::QuadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::SingleRange => "AM1 range request",
            RequestKind::OctalRange => "AM8 range request",
            RequestKind::QuadRange => "PM range request",
            RequestKind::QuadWrite => "PM address write echo",
            RequestKind::Scan => "bus scan",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device families that answer a status range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeKind {
    Single,
    Octal,
    Quad,
}

impl RangeKind {
    pub fn request_kind(&self) -> RequestKind {
        match self {
            RangeKind::Single => RequestKind::SingleRange,
            RangeKind::Octal => RequestKind::OctalRange,
            RangeKind::Quad => RequestKind::QuadRange,
        }
    }

    /// Inclusive address window accepted for a range request of this family
    pub fn address_bounds(&self) -> (u8, u8) {
        match self {
            RangeKind::Single | RangeKind::Quad => (DEVICE_ADDRESS_MIN, DEVICE_ADDRESS_MAX),
            RangeKind::Octal => (10, 99),
        }
    }
}

/// Device family reported during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// AM1, one input channel
    #[serde(rename = "AM1")]
    Single,
    /// AM8, eight input channels
    #[serde(rename = "AM8")]
    Octal,
    /// PM, four relay channels
    #[serde(rename = "PM")]
    Quad,
    /// Present on the bus but not identified yet
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Single => "AM1",
            DeviceType::Octal => "AM8",
            DeviceType::Quad => "PM",
            DeviceType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AM1 status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleRecord {
    pub address: u8,
    /// 0 = off, 1 = on
    pub power_status: u8,
    /// 0, 1 or 2
    pub input_status: u8,
    /// Bytes 3..24, not interpreted
    pub payload: Vec<u8>,
}

/// AM8 status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OctalRecord {
    pub addresses: [u8; 8],
    pub power_status: u8,
    pub inputs: [u8; 9],
    /// Addresses outside 1..=247, reported but tolerated
    pub warnings: Vec<String>,
}

/// PM status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadRecord {
    pub addresses: [u8; 4],
    pub power_status: u8,
    pub relay_statuses: [u8; 4],
    pub warnings: Vec<String>,
}

/// One device identified during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDetail {
    pub address: u8,
    pub device_type: DeviceType,
}
