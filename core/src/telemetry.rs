use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, EnvFilter};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber for the Sable workspace.
///
/// Later calls are no-ops, so binaries and unit tests can both initialize
/// logging without panicking.
pub fn init_tracing(filter: EnvFilter) -> Result<()> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let subscriber = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED.set(()).ok();

    Ok(())
}
