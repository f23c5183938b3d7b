//! Logging and observability
//!
//! Structured logging via tracing-subscriber with text or JSON formatting,
//! selected at runtime through `WORKSPACE_LOG_FORMAT`. All log output goes
//! to stderr so stdout stays reserved for command output.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// ## Arguments
///
/// * `format` - `None` or `"text"` for human-readable output, `"json"` for
///   structured JSON. `WORKSPACE_LOG_FORMAT` is consulted when `None`.
///
/// ## Environment variables
///
/// * `WORKSPACE_LOG_FORMAT` - output format (`json` or text)
/// * `WORKSPACE_LOG` - logging filter specification
/// * `RUST_LOG` - standard fallback filter
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var("WORKSPACE_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(fmt::layer().json().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Create an EnvFilter from `WORKSPACE_LOG`, falling back to `RUST_LOG`,
/// falling back to `info`.
fn create_env_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var("WORKSPACE_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            eprintln!("Invalid WORKSPACE_LOG specification '{}', using 'info'", spec);
            EnvFilter::new("info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Check whether logging has been initialized. Primarily for tests.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
