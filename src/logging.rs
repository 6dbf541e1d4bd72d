use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

fn resolve_env_filter() -> EnvFilter {
    if let Ok(level) = std::env::var("BRANCH_CHAT_LOG")
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs to a file. Used while the TUI owns the terminal.
///
/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init_file(path: &Path) -> Option<WorkerGuard> {
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty())?;
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("logging disabled: cannot create {}: {err}", dir.display());
        return None;
    }
    let file_name = path.file_name()?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
    tracing_subscriber::registry()
        .with(resolve_env_filter())
        .with(layer)
        .try_init()
        .ok()?;
    Some(guard)
}

/// Logs to stderr, for the one-shot subcommands.
pub fn init_stderr() {
    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry()
        .with(resolve_env_filter())
        .with(layer)
        .try_init();
}
