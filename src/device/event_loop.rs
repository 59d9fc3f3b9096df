//! Task that owns a `DeviceManager` and serializes everything it does.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Duration, Instant};

use super::manager::DeviceManager;
use super::scan::ScanSnapshot;
use super::sequence::{SequenceKind, SequenceState, WriteSession};
use super::Notification;
use crate::config::{ConfigStore, ProtocolSettings};
use crate::protocol::{ProtocolError, RangeKind, RequestKind, Result};
use crate::serial::{SerialInterface, Transport};

type Responder<T> = oneshot::Sender<Result<T>>;

pub enum EngineCommand {
    RequestRange {
        kind: RangeKind,
        start: u16,
        end: u16,
        responder: Responder<()>,
    },
    WriteSingleAddress {
        address: u16,
        responder: Responder<()>,
    },
    StartSequence {
        kind: SequenceKind,
        fields: Vec<String>,
        responder: Responder<()>,
    },
    StartScan {
        responder: Responder<()>,
    },
    GetScan {
        responder: oneshot::Sender<ScanSnapshot>,
    },
    ClearSavedState {
        responder: Responder<()>,
    },
    Shutdown,
}

/// Observable engine state, refreshed after every loop iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub busy: bool,
    pub awaiting: Vec<RequestKind>,
    pub sequence_state: SequenceState,
    pub sequence: Option<WriteSession>,
    pub scan_in_progress: bool,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            busy: false,
            awaiting: Vec::new(),
            sequence_state: SequenceState::Idle,
            sequence: None,
            scan_in_progress: false,
        }
    }
}

impl EngineStatus {
    fn of<T: Transport>(manager: &DeviceManager<T>) -> Self {
        Self {
            busy: manager.is_busy(),
            awaiting: manager.awaiting(),
            sequence_state: manager.sequence_state(),
            sequence: manager.write_session(),
            scan_in_progress: manager.scan().is_in_progress(),
        }
    }
}

#[derive(Clone)]
pub struct ConfiguratorHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    events_tx: broadcast::Sender<Notification>,
    status_rx: watch::Receiver<EngineStatus>,
}

impl ConfiguratorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events_tx.subscribe()
    }

    pub fn status_receiver(&self) -> watch::Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    pub fn status(&self) -> EngineStatus {
        self.status_rx.borrow().clone()
    }

    pub async fn request_range(&self, kind: RangeKind, start: u16, end: u16) -> Result<()> {
        self.call(|responder| EngineCommand::RequestRange {
            kind,
            start,
            end,
            responder,
        })
        .await?
    }

    pub async fn write_single_address(&self, address: u16) -> Result<()> {
        self.call(|responder| EngineCommand::WriteSingleAddress { address, responder })
            .await?
    }

    /// Start an AM8 or PM address write from the raw text of the channel fields
    pub async fn start_sequence(&self, kind: SequenceKind, fields: Vec<String>) -> Result<()> {
        self.call(|responder| EngineCommand::StartSequence {
            kind,
            fields,
            responder,
        })
        .await?
    }

    pub async fn start_scan(&self) -> Result<()> {
        self.call(|responder| EngineCommand::StartScan { responder }).await?
    }

    pub async fn scan_snapshot(&self) -> Result<ScanSnapshot> {
        self.call(|responder| EngineCommand::GetScan { responder }).await
    }

    pub async fn clear_saved_state(&self) -> Result<()> {
        self.call(|responder| EngineCommand::ClearSavedState { responder })
            .await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.cmd_tx
            .send(EngineCommand::Shutdown)
            .await
            .map_err(|_| ProtocolError::EngineStopped)
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> EngineCommand) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| ProtocolError::EngineStopped)?;
        rx.await.map_err(|_| ProtocolError::EngineStopped)
    }
}

pub struct ConfiguratorBuilder<T: Transport> {
    pub manager: DeviceManager<T>,
    pub lines_rx: mpsc::Receiver<String>,
    pub command_capacity: usize,
}

impl<T: Transport + 'static> ConfiguratorBuilder<T> {
    pub fn new(manager: DeviceManager<T>, lines_rx: mpsc::Receiver<String>) -> Self {
        Self {
            manager,
            lines_rx,
            command_capacity: 64,
        }
    }

    pub fn build(self) -> ConfiguratorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.command_capacity);
        let (status_tx, status_rx) = watch::channel(EngineStatus::default());
        let events_tx = self.manager.events_sender();
        tokio::spawn(event_loop(self.manager, self.lines_rx, cmd_rx, status_tx));
        ConfiguratorHandle {
            cmd_tx,
            events_tx,
            status_rx,
        }
    }
}

impl ConfiguratorBuilder<SerialInterface> {
    /// Open a serial port and wire it to a fresh engine
    pub fn open_serial(path: &str, store: Arc<dyn ConfigStore>, settings: ProtocolSettings) -> Result<Self> {
        let (interface, lines_rx) = SerialInterface::open(path, settings.baud_rate)?;
        Ok(Self::new(DeviceManager::new(interface, store, settings), lines_rx))
    }
}

pub(crate) async fn event_loop<T: Transport>(
    mut manager: DeviceManager<T>,
    mut lines_rx: mpsc::Receiver<String>,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    status_tx: watch::Sender<EngineStatus>,
) {
    manager.restore().await;
    let _ = status_tx.send(EngineStatus::of(&manager));
    let mut lines_open = true;

    loop {
        let wake = manager.next_wakeup();
        // Placeholder deadline for the disabled branch
        let far = Instant::now() + Duration::from_secs(86_400);

        select! {
            maybe_cmd = cmd_rx.recv() => {
                match maybe_cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => handle_command(&mut manager, cmd).await,
                }
            },
            maybe_line = lines_rx.recv(), if lines_open => {
                match maybe_line {
                    Some(line) => manager.handle_line(&line).await,
                    None => {
                        log::warn!("Serial reader stopped, no more responses will arrive");
                        manager.notify_error("Serial connection lost");
                        lines_open = false;
                    }
                }
            },
            _ = sleep_until(wake.unwrap_or(far)), if wake.is_some() => {
                manager.handle_timeouts().await;
                if let Err(e) = manager.advance_sequence().await {
                    log::warn!("Address write step failed: {}", e);
                }
            },
        }

        let _ = status_tx.send(EngineStatus::of(&manager));
    }

    if let Err(e) = manager.close().await {
        log::warn!("Error closing transport: {}", e);
    }
    log::info!("Configurator engine stopped");
}

async fn handle_command<T: Transport>(manager: &mut DeviceManager<T>, cmd: EngineCommand) {
    match cmd {
        EngineCommand::RequestRange {
            kind,
            start,
            end,
            responder,
        } => {
            let _ = responder.send(manager.request_range(kind, start, end).await);
        }
        EngineCommand::WriteSingleAddress { address, responder } => {
            let _ = responder.send(manager.write_single_address(address).await);
        }
        EngineCommand::StartSequence {
            kind,
            fields,
            responder,
        } => {
            let _ = responder.send(manager.start_sequence(kind, Box::new(fields)).await);
        }
        EngineCommand::StartScan { responder } => {
            let _ = responder.send(manager.start_scan().await);
        }
        EngineCommand::GetScan { responder } => {
            let _ = responder.send(manager.scan().snapshot());
        }
        EngineCommand::ClearSavedState { responder } => {
            let _ = responder.send(manager.clear_saved_state().await);
        }
        EngineCommand::Shutdown => {}
    }
}
