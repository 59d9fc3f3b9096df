use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::protocol::frame::command;
use crate::protocol::validate::validate_field;
use crate::protocol::{Frame, ProtocolError, Result, DEVICE_ADDRESS_MAX, DEVICE_ADDRESS_MIN};

/// Multi-channel device whose channel addresses are written one by one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceKind {
    /// AM8, eight channels
    Octal,
    /// PM, four channels
    Quad,
}

impl SequenceKind {
    pub fn total(&self) -> usize {
        match self {
            SequenceKind::Octal => 8,
            SequenceKind::Quad => 4,
        }
    }

    pub fn command_byte(&self) -> u8 {
        match self {
            SequenceKind::Octal => command::WRITE_OCTAL,
            SequenceKind::Quad => command::WRITE_QUAD,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceKind::Octal => "AM8",
            SequenceKind::Quad => "PM",
        }
    }
}

/// Source of the address typed in for each channel
pub trait AddressFields: Send + Sync {
    /// Raw text of the field for channel `index`, `None` if there is no such field
    fn field(&self, index: usize) -> Option<String>;
}

impl<T: AsRef<str> + Send + Sync> AddressFields for Vec<T> {
    fn field(&self, index: usize) -> Option<String> {
        self.get(index).map(|value| value.as_ref().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceState {
    Idle,
    WritingStep(usize),
    Done,
    Aborted(usize),
}

/// Progress of the running write sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSession {
    pub kind: SequenceKind,
    pub current_index: usize,
    pub total: usize,
    pub active: bool,
}

/// Frame for the current step, ready to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedStep {
    pub kind: SequenceKind,
    pub index: usize,
    pub address: u8,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Next step scheduled at the given instant
    Scheduled { next_index: usize, due: Instant },
    /// Every channel written
    Completed { kind: SequenceKind },
}

/// Writes channel addresses one step at a time.
///
/// A step advances only after its frame was handed to the transport; the
/// next step is then due after the pacing delay. Any failure ends the
/// sequence and leaves earlier steps committed on the device.
pub struct SequencedWriteController {
    state: SequenceState,
    kind: Option<SequenceKind>,
    fields: Option<Box<dyn AddressFields>>,
    next_due: Option<Instant>,
    step_delay: Duration,
}

impl SequencedWriteController {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            state: SequenceState::Idle,
            kind: None,
            fields: None,
            next_due: None,
            step_delay,
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SequenceState::WritingStep(_))
    }

    pub fn session(&self) -> Option<WriteSession> {
        let kind = self.kind?;
        let current_index = match self.state {
            SequenceState::WritingStep(index) | SequenceState::Aborted(index) => index,
            SequenceState::Done => kind.total(),
            SequenceState::Idle => 0,
        };
        Some(WriteSession {
            kind,
            current_index,
            total: kind.total(),
            active: self.is_active(),
        })
    }

    /// When the current step should run
    pub fn due_at(&self) -> Option<Instant> {
        if self.is_active() {
            self.next_due
        } else {
            None
        }
    }

    pub fn start(&mut self, kind: SequenceKind, fields: Box<dyn AddressFields>, now: Instant) -> Result<()> {
        if self.is_active() {
            return Err(ProtocolError::SequenceInProgress);
        }
        log::info!("Starting {} address write, {} steps", kind.as_str(), kind.total());
        self.kind = Some(kind);
        self.fields = Some(fields);
        self.state = SequenceState::WritingStep(0);
        self.next_due = Some(now);
        Ok(())
    }

    /// Validate the field for the current step and build its frame.
    /// A validation failure aborts the sequence at this step. `None` when
    /// no sequence is running.
    pub fn prepare_step(&mut self) -> Option<Result<PreparedStep>> {
        let (kind, index) = match (self.kind, self.state) {
            (Some(kind), SequenceState::WritingStep(index)) => (kind, index),
            _ => return None,
        };
        let field_name = format!("{} channel {}", kind.as_str(), index + 1);
        let text = self
            .fields
            .as_ref()
            .and_then(|fields| fields.field(index))
            .unwrap_or_default();

        let step = match validate_field(&field_name, &text, DEVICE_ADDRESS_MIN, DEVICE_ADDRESS_MAX) {
            Ok(address) => Ok(PreparedStep {
                kind,
                index,
                address,
                frame: Frame::single_write(kind.command_byte(), index as u8, address),
            }),
            Err(e) => {
                self.abort(&e.to_string());
                Err(e)
            }
        };
        Some(step)
    }

    /// The current step's frame reached the transport.
    pub fn step_sent(&mut self, now: Instant) -> Option<StepOutcome> {
        let (kind, index) = match (self.kind, self.state) {
            (Some(kind), SequenceState::WritingStep(index)) => (kind, index),
            _ => return None,
        };
        let next_index = index + 1;
        if next_index >= kind.total() {
            log::info!("{} address write completed", kind.as_str());
            self.state = SequenceState::Done;
            self.next_due = None;
            self.fields = None;
            return Some(StepOutcome::Completed { kind });
        }
        let due = now + self.step_delay;
        self.state = SequenceState::WritingStep(next_index);
        self.next_due = Some(due);
        Some(StepOutcome::Scheduled { next_index, due })
    }

    /// Stop at the current step. No retry is attempted.
    pub fn abort(&mut self, reason: &str) {
        if let SequenceState::WritingStep(index) = self.state {
            log::warn!(
                "{} address write aborted at step {}: {}",
                self.kind.map(|k| k.as_str()).unwrap_or("?"),
                index + 1,
                reason
            );
            self.state = SequenceState::Aborted(index);
        }
        self.next_due = None;
        self.fields = None;
    }

    /// Return to `Idle` after completion has been reported.
    pub fn reset(&mut self) {
        self.state = SequenceState::Idle;
        self.kind = None;
        self.fields = None;
        self.next_due = None;
    }
}
