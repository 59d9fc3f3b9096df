pub mod config;
pub mod device;
pub mod protocol;
pub mod serial;

pub use config::{ConfigStore, JsonFileStore, MemoryStore, ProtocolSettings};
pub use device::{ConfiguratorBuilder, ConfiguratorHandle, DeviceManager, Notification};
pub use protocol::{ProtocolError, RangeKind};
pub use serial::{SerialInterface, Transport};

/// Install the process-wide logger. `RUST_LOG` overrides the default `info` level.
/// Calling it again is harmless.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).try_init();
}
