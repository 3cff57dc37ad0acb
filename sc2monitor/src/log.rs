use anyhow::Context as _;
use sc2monitor_log::{DbLogLayer, LoggerGuard, StaticLogConfig};

use crate::config::Conf;

pub struct MonitorLog;

impl StaticLogConfig for MonitorLog {
    const MAX_BYTES_PER_LOG_FILE: u64 = 3_000_000; // 3 MB;
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "sc2monitor";
}

/// Installs the global subscriber according to the configuration.
pub fn init_log(conf: &Conf, db_layer: Option<DbLogLayer>) -> anyhow::Result<LoggerGuard> {
    if let Some(folder) = conf.log_file.parent() {
        std::fs::create_dir_all(folder).with_context(|| format!("failed to create log folder at {folder}"))?;
    }

    sc2monitor_log::init::<MonitorLog>(
        &conf.log_file,
        conf.verbosity_profile.to_log_filter(),
        conf.debug.log_directives.as_deref(),
        db_layer,
    )
    .context("failed to setup logger")
}
