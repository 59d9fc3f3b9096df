pub mod settings;
pub mod store;

pub use settings::ProtocolSettings;
pub use store::{ConfigStore, JsonFileStore, MemoryStore, PersistedState};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration data: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
