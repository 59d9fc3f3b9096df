use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::protocol::types::{
    DeviceType, OctalRecord, QuadRecord, RangeKind, RequestKind, ScanDetail, SingleRecord,
};
pub use super::scan::ScanSnapshot;
pub use super::sequence::{SequenceKind, SequenceState, WriteSession};

/// Messages published to the UI shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    SingleStatus { record: SingleRecord },
    OctalStatus { record: OctalRecord },
    QuadStatus { record: QuadRecord },
    /// Addresses reported back after a PM channel write
    QuadAddressEcho { record: QuadRecord },
    ScanStarted { session_id: Uuid },
    ScanProgress { address: u8, device_type: DeviceType },
    ScanCompleted { addresses: Vec<u8> },
    ScanTimedOut { identified: usize, discovered: Vec<u8> },
    SequenceStep { kind: SequenceKind, index: usize, address: u8 },
    SequenceCompleted { kind: SequenceKind },
    SequenceAborted { kind: SequenceKind, index: usize, reason: String },
    Acknowledged { line: String },
    DeviceReportedError { line: String },
    Timeout { kind: RequestKind },
    BusyChanged { busy: bool },
    Error { message: String },
}
