pub mod config_loader;
pub mod settings;
pub mod source_registry;

pub use config_loader::ConfigLoader;
pub use settings::{Settings, SettingsError};
pub use source_registry::{Capability, SourceCategory, SourceConfig, SourceRegistry, TrackConfig};
