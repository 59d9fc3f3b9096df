use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::frame::command;
use crate::protocol::parser::{decode_scan_detail, decode_scan_list};
use crate::protocol::{
    DeviceClassifier, DeviceType, Frame, ProtocolError, Result, DEVICE_ADDRESS_MIN, SCAN_ADDRESS_MAX,
};

/// Persisted form of the scan results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub session_id: Uuid,
    pub results: BTreeMap<u8, bool>,
    pub devices: BTreeMap<u8, DeviceType>,
    pub in_progress: bool,
    pub updated_at: DateTime<Utc>,
}

/// Effect of one inbound line on the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUpdate {
    /// Terminal scan list received
    Completed { addresses: Vec<u8> },
    /// One device identified, scan continues
    Detail { address: u8, device_type: DeviceType },
    /// Line carried nothing for the scan
    Unrelated,
}

/// Discovery results for addresses 1..=127
pub struct ScanSession {
    session_id: Uuid,
    results: BTreeMap<u8, bool>,
    devices: BTreeMap<u8, DeviceType>,
    in_progress: bool,
    updated_at: DateTime<Utc>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            results: empty_results(),
            devices: BTreeMap::new(),
            in_progress: false,
            updated_at: Utc::now(),
        }
    }

    /// Rebuild from a persisted snapshot. A scan cannot survive a restart,
    /// so the restored session is never in progress.
    pub fn from_snapshot(snapshot: ScanSnapshot) -> Self {
        let mut results = empty_results();
        for (address, present) in snapshot.results {
            if let Some(slot) = results.get_mut(&address) {
                *slot = present;
            }
        }
        let devices = snapshot
            .devices
            .into_iter()
            .filter(|(address, _)| results.contains_key(address))
            .collect();
        Self {
            session_id: snapshot.session_id,
            results,
            devices,
            in_progress: false,
            updated_at: snapshot.updated_at,
        }
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            session_id: self.session_id,
            results: self.results.clone(),
            devices: self.devices.clone(),
            in_progress: self.in_progress,
            updated_at: self.updated_at,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn is_present(&self, address: u8) -> bool {
        self.results.get(&address).copied().unwrap_or(false)
    }

    pub fn device_type(&self, address: u8) -> Option<DeviceType> {
        self.devices.get(&address).copied()
    }

    /// Addresses marked present, ascending
    pub fn discovered(&self) -> Vec<u8> {
        self.results
            .iter()
            .filter(|(_, present)| **present)
            .map(|(address, _)| *address)
            .collect()
    }

    /// Clear all results and return the scan frame to send.
    /// Rejected without touching existing results while a scan runs.
    pub fn begin(&mut self) -> Result<Frame> {
        if self.in_progress {
            return Err(ProtocolError::ScanInProgress);
        }
        self.session_id = Uuid::new_v4();
        self.results = empty_results();
        self.devices.clear();
        self.in_progress = true;
        self.touch();
        log::info!("Bus scan {} started", self.session_id);
        Ok(Frame::range_request(
            command::SCAN,
            DEVICE_ADDRESS_MIN as u16,
            SCAN_ADDRESS_MAX as u16,
        ))
    }

    /// The scan frame could not be sent
    pub fn abandon(&mut self) {
        self.in_progress = false;
        self.touch();
    }

    /// Interpret a line claimed by the scan wait-flag.
    pub fn handle_line(&mut self, line: &str, classifier: &dyn DeviceClassifier) -> ScanUpdate {
        let addresses = decode_scan_list(line);
        if !addresses.is_empty() {
            for address in &addresses {
                self.results.insert(*address, true);
                self.devices.entry(*address).or_insert(DeviceType::Unknown);
            }
            self.in_progress = false;
            self.touch();
            log::info!("Bus scan {} found {} device(s)", self.session_id, addresses.len());
            return ScanUpdate::Completed { addresses };
        }

        match decode_scan_detail(line, classifier) {
            Some(detail) => {
                self.devices.insert(detail.address, detail.device_type);
                self.touch();
                log::debug!("Address {} identified as {}", detail.address, detail.device_type);
                ScanUpdate::Detail {
                    address: detail.address,
                    device_type: detail.device_type,
                }
            }
            None => {
                log::debug!("Line ignored during scan: {}", line);
                ScanUpdate::Unrelated
            }
        }
    }

    /// The scan wait-flag expired. Results gathered so far are kept.
    pub fn on_timeout(&mut self) -> usize {
        self.in_progress = false;
        self.touch();
        let identified = self.devices.len();
        log::warn!("Bus scan {} timed out, {} device(s) identified so far", self.session_id, identified);
        identified
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_results() -> BTreeMap<u8, bool> {
    (DEVICE_ADDRESS_MIN..=SCAN_ADDRESS_MAX).map(|address| (address, false)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MarkerClassifier;

    #[test]
    fn test_begin_resets_and_builds_frame() {
        let mut scan = ScanSession::new();
        let frame = scan.begin().unwrap();
        assert_eq!(frame.command(), command::SCAN);
        assert_eq!((frame.param_a(), frame.param_b()), (1, 127));
        assert!(scan.is_in_progress());
        assert_eq!(scan.snapshot().results.len(), 127);
        assert!(scan.discovered().is_empty());
    }

    #[test]
    fn test_begin_rejected_while_running() {
        let classifier = MarkerClassifier::default();
        let mut scan = ScanSession::new();
        scan.begin().unwrap();
        scan.handle_line("5:AM8", &classifier);
        let id = scan.session_id();

        assert!(matches!(scan.begin(), Err(ProtocolError::ScanInProgress)));
        assert_eq!(scan.session_id(), id);
        assert_eq!(scan.device_type(5), Some(DeviceType::Octal));
    }

    #[test]
    fn test_details_then_list() {
        let classifier = MarkerClassifier::default();
        let mut scan = ScanSession::new();
        scan.begin().unwrap();

        assert_eq!(
            scan.handle_line("12:PM", &classifier),
            ScanUpdate::Detail { address: 12, device_type: DeviceType::Quad }
        );
        assert!(scan.is_in_progress());
        assert_eq!(scan.handle_line("hello", &classifier), ScanUpdate::Unrelated);

        assert_eq!(
            scan.handle_line("МОК_SCAN:3,12", &classifier),
            ScanUpdate::Completed { addresses: vec![3, 12] }
        );
        assert!(!scan.is_in_progress());
        assert_eq!(scan.discovered(), vec![3, 12]);
        assert_eq!(scan.device_type(3), Some(DeviceType::Unknown));
        assert_eq!(scan.device_type(12), Some(DeviceType::Quad));
    }

    #[test]
    fn test_timeout_keeps_partial_results() {
        let classifier = MarkerClassifier::default();
        let mut scan = ScanSession::new();
        scan.begin().unwrap();
        scan.handle_line("7:AM1", &classifier);
        scan.handle_line("9:AM8", &classifier);

        assert_eq!(scan.on_timeout(), 2);
        assert!(!scan.is_in_progress());
        assert_eq!(scan.device_type(7), Some(DeviceType::Single));
        assert_eq!(scan.device_type(9), Some(DeviceType::Octal));
    }

    #[test]
    fn test_snapshot_restore() {
        let classifier = MarkerClassifier::default();
        let mut scan = ScanSession::new();
        scan.begin().unwrap();
        scan.handle_line("20:PM", &classifier);
        let mut snapshot = scan.snapshot();
        snapshot.results.insert(200, true);

        let restored = ScanSession::from_snapshot(snapshot);
        assert!(!restored.is_in_progress());
        assert_eq!(restored.session_id(), scan.session_id());
        assert_eq!(restored.device_type(20), Some(DeviceType::Quad));
        assert!(!restored.is_present(200));
    }
}
