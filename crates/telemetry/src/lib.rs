use tracing_subscriber::{fmt, EnvFilter};

pub mod logging;

pub use logging::{init_structured_logging, LogConfig, LogFormat, LoggingGuard};

/// Plain `info`-level logging, used by tests and tools that skip configuration
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
