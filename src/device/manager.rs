use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use super::correlator::{Correlated, RequestCorrelator};
use super::scan::{ScanSession, ScanSnapshot, ScanUpdate};
use super::sequence::{AddressFields, SequenceKind, SequenceState, SequencedWriteController, StepOutcome, WriteSession};
use super::Notification;
use crate::config::{ConfigStore, PersistedState, ProtocolSettings};
use crate::protocol::frame::command;
use crate::protocol::validate::validate_number;
use crate::protocol::{
    DeviceClassifier, Frame, MarkerClassifier, ProtocolError, RangeKind, RequestKind, Result,
    DEVICE_ADDRESS_MAX, DEVICE_ADDRESS_MIN,
};
use crate::serial::Transport;

const EVENT_CAPACITY: usize = 256;

/// Protocol engine for one bus connection.
///
/// Owns the transport, the wait-flags, the write sequence and the scan
/// results. Every method takes `&mut self`; the event loop is the only
/// caller in a running application so all state changes are serialized.
pub struct DeviceManager<T: Transport> {
    transport: T,
    store: Arc<dyn ConfigStore>,
    settings: ProtocolSettings,
    classifier: Box<dyn DeviceClassifier>,
    correlator: RequestCorrelator,
    sequence: SequencedWriteController,
    scan: ScanSession,
    events_tx: broadcast::Sender<Notification>,
}

impl<T: Transport> DeviceManager<T> {
    pub fn new(transport: T, store: Arc<dyn ConfigStore>, settings: ProtocolSettings) -> Self {
        let (events_tx, _events_rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            store,
            sequence: SequencedWriteController::new(settings.write_step_delay()),
            settings,
            classifier: Box::new(MarkerClassifier::default()),
            correlator: RequestCorrelator::new(),
            scan: ScanSession::new(),
            events_tx,
        }
    }

    /// Replace the scan detail classifier
    pub fn with_classifier(mut self, classifier: impl DeviceClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events_tx.subscribe()
    }

    pub(crate) fn events_sender(&self) -> broadcast::Sender<Notification> {
        self.events_tx.clone()
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scan(&self) -> &ScanSession {
        &self.scan
    }

    pub fn sequence_state(&self) -> SequenceState {
        self.sequence.state()
    }

    pub fn write_session(&self) -> Option<WriteSession> {
        self.sequence.session()
    }

    pub fn is_busy(&self) -> bool {
        self.correlator.is_busy()
    }

    pub fn awaiting(&self) -> Vec<RequestKind> {
        self.correlator.awaiting()
    }

    /// Load scan results saved by a previous run, then write the current
    /// settings back so the port in use is remembered even if no scan runs.
    /// Returns whether scan results were restored.
    pub async fn restore(&mut self) -> bool {
        let stored = match PersistedState::load(self.store.as_ref()).await {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("Could not load stored configuration: {}", e);
                return false;
            }
        };

        let restored = match stored.and_then(|state| state.scan) {
            Some(snapshot) => {
                self.scan = ScanSession::from_snapshot(snapshot);
                log::info!(
                    "Restored scan {} with {} device(s)",
                    self.scan.session_id(),
                    self.scan.discovered().len()
                );
                true
            }
            None => false,
        };

        let scan = restored.then(|| self.scan.snapshot());
        self.save_state(scan).await;
        restored
    }

    /// Forget saved results, on disk and in memory.
    pub async fn clear_saved_state(&mut self) -> Result<()> {
        if self.scan.is_in_progress() {
            return Err(ProtocolError::ScanInProgress);
        }
        self.store.clear_config().await?;
        self.scan = ScanSession::new();
        log::info!("Saved scan results cleared");
        Ok(())
    }

    /// Ask devices in `start..=end` of one family for their status.
    pub async fn request_range(&mut self, kind: RangeKind, start: u16, end: u16) -> Result<()> {
        let (min, max) = kind.address_bounds();
        let start = validate_number("start", start, min, max)?;
        let end = validate_number("end", end, start, max)?;

        let frame = Frame::range_request(command::RANGE_REQUEST, start as u16, end as u16);
        self.send_frame(&frame).await?;
        self.arm(kind.request_kind(), self.settings.range_timeout());
        log::info!("Requested {} for {}..={}", kind.request_kind(), start, end);
        Ok(())
    }

    /// Assign a new address to an AM1 device. The device answers on the
    /// generic OK/ERROR channel.
    pub async fn write_single_address(&mut self, new_address: u16) -> Result<()> {
        let address = validate_number("address", new_address, DEVICE_ADDRESS_MIN, DEVICE_ADDRESS_MAX)?;
        let frame = Frame::single_write(command::WRITE_SINGLE, 0, address);
        self.send_frame(&frame).await?;
        log::info!("AM1 address write sent: {}", address);
        Ok(())
    }

    /// Start writing channel addresses. The first step runs immediately.
    pub async fn start_sequence(&mut self, kind: SequenceKind, fields: Box<dyn AddressFields>) -> Result<()> {
        self.sequence.start(kind, fields, Instant::now())?;
        self.advance_sequence().await
    }

    /// Run the pending sequence step if it is due.
    pub async fn advance_sequence(&mut self) -> Result<()> {
        match self.sequence.due_at() {
            Some(due) if due <= Instant::now() => {}
            _ => return Ok(()),
        }

        let step = match self.sequence.prepare_step() {
            None => return Ok(()),
            Some(Ok(step)) => step,
            Some(Err(e)) => {
                self.publish_abort(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.send_frame(&step.frame).await {
            self.sequence.abort(&e.to_string());
            self.publish_abort(&e);
            return Err(e);
        }

        self.publish(Notification::SequenceStep {
            kind: step.kind,
            index: step.index,
            address: step.address,
        });
        if step.kind == SequenceKind::Quad {
            // Echo only refreshes the displayed addresses, the sequence does not wait for it
            self.arm(RequestKind::QuadWrite, self.settings.echo_timeout());
        }

        if let Some(StepOutcome::Completed { kind }) = self.sequence.step_sent(Instant::now()) {
            self.publish(Notification::SequenceCompleted { kind });
            self.sequence.reset();
        }
        Ok(())
    }

    /// Start a bus-wide discovery scan.
    pub async fn start_scan(&mut self) -> Result<()> {
        let frame = self.scan.begin()?;
        self.persist().await;

        if let Err(e) = self.send_frame(&frame).await {
            self.scan.abandon();
            self.persist().await;
            return Err(e);
        }
        self.arm(RequestKind::Scan, self.settings.scan_timeout());
        self.publish(Notification::ScanStarted {
            session_id: self.scan.session_id(),
        });
        Ok(())
    }

    /// Process one inbound line. Errors become notifications.
    pub async fn handle_line(&mut self, line: &str) {
        let was_busy = self.correlator.is_busy();
        match self.correlator.correlate(line) {
            Correlated::Single(record) => self.publish(Notification::SingleStatus { record }),
            Correlated::Octal(record) => self.publish(Notification::OctalStatus { record }),
            Correlated::QuadRange(record) => self.publish(Notification::QuadStatus { record }),
            Correlated::QuadEcho(record) => self.publish(Notification::QuadAddressEcho { record }),
            Correlated::ScanLine(line) => self.handle_scan_line(&line).await,
            Correlated::Malformed { kind, error } => {
                log::warn!("{}: {}", kind, error);
                self.publish(Notification::Error {
                    message: format!("{}: {}", kind, error),
                });
            }
            Correlated::Acknowledged(line) => self.publish(Notification::Acknowledged { line }),
            Correlated::DeviceError(line) => {
                log::warn!("Device reported error: {}", line);
                self.publish(Notification::DeviceReportedError { line });
            }
            Correlated::Unclaimed(line) => log::debug!("Unclaimed line: {}", line),
        }
        self.publish_busy_change(was_busy);
    }

    async fn handle_scan_line(&mut self, line: &str) {
        match self.scan.handle_line(line, self.classifier.as_ref()) {
            ScanUpdate::Completed { addresses } => {
                self.correlator.clear(RequestKind::Scan);
                self.persist().await;
                self.publish(Notification::ScanCompleted { addresses });
            }
            ScanUpdate::Detail { address, device_type } => {
                self.persist().await;
                self.publish(Notification::ScanProgress { address, device_type });
            }
            ScanUpdate::Unrelated => {}
        }
    }

    /// Surface every wait-flag whose deadline has passed.
    pub async fn handle_timeouts(&mut self) {
        let was_busy = self.correlator.is_busy();
        for kind in self.correlator.expire(Instant::now()) {
            if kind == RequestKind::Scan {
                let identified = self.scan.on_timeout();
                self.persist().await;
                self.publish(Notification::ScanTimedOut {
                    identified,
                    discovered: self.scan.discovered(),
                });
            }
            let error = ProtocolError::Timeout { kind };
            self.publish(Notification::Timeout { kind });
            self.publish(Notification::Error {
                message: error.to_string(),
            });
        }
        self.publish_busy_change(was_busy);
    }

    /// Earliest instant at which a timeout or a sequence step is due
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.correlator.next_deadline(), self.sequence.due_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.sequence.is_active() {
            self.sequence.abort("connection closed");
        }
        self.transport.close().await?;
        Ok(())
    }

    pub(crate) fn notify_error(&self, message: impl Into<String>) {
        self.publish(Notification::Error {
            message: message.into(),
        });
    }

    fn arm(&mut self, kind: RequestKind, timeout: Duration) {
        let was_busy = self.correlator.is_busy();
        self.correlator.arm(kind, timeout, Instant::now());
        self.publish_busy_change(was_busy);
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        log::debug!("Sending frame {}", frame);
        self.transport.send(&frame.to_hex()).await.map_err(|e| {
            log::error!("Failed to send frame {}: {}", frame, e);
            ProtocolError::from(e)
        })
    }

    async fn persist(&self) {
        self.save_state(Some(self.scan.snapshot())).await;
    }

    async fn save_state(&self, scan: Option<ScanSnapshot>) {
        let state = PersistedState::new(self.settings.clone(), scan);
        if let Err(e) = state.save(self.store.as_ref()).await {
            log::warn!("Failed to save configuration: {}", e);
        }
    }

    fn publish_abort(&self, error: &ProtocolError) {
        if let (Some(session), SequenceState::Aborted(index)) = (self.sequence.session(), self.sequence.state()) {
            self.publish(Notification::SequenceAborted {
                kind: session.kind,
                index,
                reason: error.to_string(),
            });
        }
    }

    fn publish_busy_change(&self, was_busy: bool) {
        let busy = self.correlator.is_busy();
        if busy != was_busy {
            self.publish(Notification::BusyChanged { busy });
        }
    }

    fn publish(&self, notification: Notification) {
        // No subscribers is fine, the UI may not be listening yet
        let _ = self.events_tx.send(notification);
    }
}
