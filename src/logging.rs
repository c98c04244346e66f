use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{KernelError, Result};

/// Installs the global tracing subscriber for the kernel.
///
/// `filter` takes the usual env-filter syntax, e.g. `"info"` or
/// `"penumbra::index=debug"`. Thread names are included in the output since
/// population workers are named after the index they build.
pub fn init_logging(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| KernelError::InvalidArgument(format!("invalid log filter: {e}")))?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|_| KernelError::InvalidArgument("logging already initialized".into()))
}
