//! Diagnostic logging
//!
//! Diagnostics always go to stderr; stdout is reserved for hook responses.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::GuardError;

/// Initialize the logging system with a `tracing` filter directive
pub fn init_logging(level: &str) -> Result<(), GuardError> {
    let filter = EnvFilter::try_new(level).map_err(|e| GuardError::Logging(e.to_string()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| GuardError::Logging(e.to_string()))?;

    Ok(())
}
