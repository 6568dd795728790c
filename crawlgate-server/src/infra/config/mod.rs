pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigWarnings};
pub use models::{Config, ConfigMetadata, ServerConfig, StoreConfig};
