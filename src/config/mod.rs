pub mod settings;

pub use settings::{ConfigError, Secret, Settings, DEFAULT_REDIS_URL};
