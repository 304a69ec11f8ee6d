pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod source;
pub mod telemetry;

pub use config::AssetConfig;
pub use engine::loader::{ProgressiveLoader, Resolution};
pub use engine::manager::{AssetManager, Collaborators};
pub use engine::record::{AssetHandle, AssetKind, AssetRecord, AssetSource, AssetStatus, LoadRequest};
pub use error::{AssetError, ConfigError, ServiceError};
