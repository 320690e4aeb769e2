mod settings;

pub use settings::{LogConfig, OtelConfig, RelayConfig, ServerConfig, Settings};
