use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

/// Logs to stderr so stdout only carries output paths. Warnings (skipped
/// blocks, alignment drift) are always shown; `verbose` adds per-page and
/// per-chunk detail.
pub fn init(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let _ = fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .without_time()
        .try_init();
    Ok(())
}
