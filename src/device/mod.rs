pub mod correlator;
pub mod event_loop;
pub mod manager;
pub mod models;
pub mod scan;
pub mod sequence;

pub use correlator::{Correlated, RequestCorrelator};
pub use event_loop::{ConfiguratorBuilder, ConfiguratorHandle, EngineCommand, EngineStatus};
pub use manager::DeviceManager;
pub use models::*;
pub use scan::{ScanSession, ScanUpdate};
pub use sequence::{AddressFields, SequencedWriteController};
