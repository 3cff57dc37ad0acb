#[macro_use]
extern crate tracing;

mod db;
mod deleter;

use std::io;

use anyhow::Context as _;
use camino::Utf8Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub use db::{DbLogLayer, DbLogReceiver, LogPurgeTask, LogWriterTask, db_log_channel};
pub use deleter::{LogDeleterTask, delete_old_log_files};

pub trait StaticLogConfig {
    const MAX_BYTES_PER_LOG_FILE: u64;
    const MAX_LOG_FILES: usize;
    const LOG_FILE_PREFIX: &'static str;
}

pub struct LoggerGuard {
    _file_guard: WorkerGuard,
    _stdio_guard: WorkerGuard,
}

/// Folder and file name prefix of the log files.
///
/// The configured path is either a folder, or the prefix of the files inside a folder.
pub(crate) struct LogPath<'a> {
    pub(crate) folder: &'a Utf8Path,
    pub(crate) prefix: &'a str,
}

impl<'a> LogPath<'a> {
    pub(crate) fn resolve<C: StaticLogConfig>(path: &'a Utf8Path) -> anyhow::Result<Self> {
        if path.is_dir() {
            Ok(Self {
                folder: path,
                prefix: C::LOG_FILE_PREFIX,
            })
        } else {
            Ok(Self {
                folder: path.parent().context("invalid log path (parent)")?,
                prefix: path.file_name().context("invalid log path (file_name)")?,
            })
        }
    }
}

/// Installs the global subscriber.
///
/// Events go to a size-rotated log file, to stdout and, when provided, to the database layer.
pub fn init<C: StaticLogConfig>(
    path: &Utf8Path,
    log_filter: &str,
    debug_filtering_directives: Option<&str>,
    db_layer: Option<DbLogLayer>,
) -> anyhow::Result<LoggerGuard> {
    let log_path = LogPath::resolve::<C>(path)?;

    let file_appender = file_appender::<C>(&log_path)?;
    let (file_non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().with_writer(file_non_blocking).with_ansi(false);

    let (non_blocking_stdio, stdio_guard) = tracing_appender::non_blocking(io::stdout());
    let stdio_layer = fmt::layer().with_writer(non_blocking_stdio);

    let env_filter = build_env_filter(log_filter, debug_filtering_directives)?;

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdio_layer)
        .with(db_layer)
        .with(env_filter)
        .try_init()
        .context("failed to install the global subscriber")?;

    Ok(LoggerGuard {
        _file_guard: file_guard,
        _stdio_guard: stdio_guard,
    })
}

fn file_appender<C: StaticLogConfig>(log_path: &LogPath<'_>) -> anyhow::Result<rolling::RollingFileAppender> {
    rolling::Builder::new()
        .rotation(rolling::Rotation::max_bytes(C::MAX_BYTES_PER_LOG_FILE))
        .filename_prefix(log_path.prefix)
        .filename_suffix("log")
        .max_log_files(C::MAX_LOG_FILES)
        .build(log_path.folder)
        .context("couldn’t create file appender")
}

fn build_env_filter(log_filter: &str, debug_filtering_directives: Option<&str>) -> anyhow::Result<EnvFilter> {
    let env_filter = EnvFilter::try_new(log_filter).context("invalid built-in filtering directives (this is a bug)")?;

    // Optionally add additional debugging filtering directives
    debug_filtering_directives
        .into_iter()
        .flat_map(|directives| directives.split(','))
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .try_fold(env_filter, |env_filter, directive| {
            let directive = directive
                .parse()
                .with_context(|| format!("invalid log directive `{directive}` (debug option)"))?;
            Ok(env_filter.add_directive(directive))
        })
}
