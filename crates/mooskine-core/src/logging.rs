//! Logging setup for host shells
//!
//! The library only emits `tracing` events. A host that wants to see them
//! calls one of these once at startup; later calls are ignored.

use std::fs::File;
use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("mooskine_core={}", level))
}

/// Log to stderr at `level` ("error", "warn", "info", "debug", "trace")
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log to a file at `path`, replacing its previous contents
pub fn init_file(path: &Path, level: &str) -> std::io::Result<()> {
    let log_file = File::create(path)?;

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", path);
    Ok(())
}
