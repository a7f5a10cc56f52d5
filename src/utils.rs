// Logging bootstrap shared by the embedding app and the integration tests.

use std::fs::OpenOptions;

use anyhow::Result;
use log::LevelFilter;

/// Initialize the global logger.
///
/// With a path the log goes to that file (appended); without one it goes to
/// stderr. Call this once per process; a second call returns an error from
/// the log facade.
pub fn setup_logging(log_file: Option<&str>, level: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    log::info!(
        "{} v{} logging at {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        level
    );
    Ok(())
}
