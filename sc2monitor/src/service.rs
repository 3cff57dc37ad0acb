use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ladder_store::{DynLadderRepo, LadderRepo as _};
use ladder_store_libsql::LibSqlLadderRepo;
use sc2monitor_log::{DbLogReceiver, LogDeleterTask, LogPurgeTask, LogWriterTask, LoggerGuard};
use sc2monitor_task::{ShutdownHandle, StopPolicy, TaskSet};
use tokio::runtime::{self, Runtime};

use crate::config::{Conf, ConfHandle};
use crate::log::{MonitorLog, init_log};
use crate::monitor::Monitor;
use crate::poller::PollingTask;

pub const SERVICE_NAME: &str = "sc2monitor";

const DB_LOG_CHANNEL_CAPACITY: usize = 1024;

#[allow(clippy::large_enum_variant)] // `Running` variant is bigger than `Stopped` but we don't care
enum MonitorState {
    Stopped,
    Running {
        shutdown_handle: ShutdownHandle,
        runtime: Runtime,
    },
}

pub struct MonitorService {
    conf_handle: ConfHandle,
    state: MonitorState,
    db_log_receiver: Option<DbLogReceiver>,
    _logger_guard: LoggerGuard,
}

impl MonitorService {
    pub fn load(conf_handle: ConfHandle) -> anyhow::Result<Self> {
        let conf = conf_handle.get_conf();

        let (db_layer, db_log_receiver) =
            sc2monitor_log::db_log_channel(DB_LOG_CHANNEL_CAPACITY, conf.db_log_level.to_level_filter());

        let logger_guard = init_log(&conf, Some(db_layer))?;

        info!(version = env!("CARGO_PKG_VERSION"));

        let conf_file = conf_handle.get_conf_file();
        trace!(?conf_file);

        if !conf.debug.is_default() {
            warn!(
                ?conf.debug,
                "**DEBUG OPTIONS ARE ENABLED, PLEASE DO NOT USE IN PRODUCTION**",
            );
        }

        Ok(MonitorService {
            conf_handle,
            state: MonitorState::Stopped,
            db_log_receiver: Some(db_log_receiver),
            _logger_guard: logger_guard,
        })
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let db_log_receiver = self.db_log_receiver.take().context("service was already started once")?;

        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create runtime")?;

        let conf = self.conf_handle.get_conf();

        let tasks = runtime.block_on(spawn_tasks(conf, db_log_receiver))?;

        trace!(count = tasks.len(), "Tasks created");

        let (join_all, shutdown_handle) = tasks.into_parts();
        runtime.spawn(join_all);

        self.state = MonitorState::Running {
            shutdown_handle,
            runtime,
        };

        Ok(())
    }

    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, MonitorState::Stopped) {
            MonitorState::Stopped => {
                info!("Attempted to stop monitor service, but it's already stopped");
            }
            MonitorState::Running {
                shutdown_handle,
                runtime,
            } => {
                info!("Stopping monitor service");

                runtime.block_on(sc2monitor_task::stop(&shutdown_handle, StopPolicy::default()));

                // Wait for 1 more second before forcefully shutting down the runtime
                runtime.shutdown_timeout(Duration::from_secs(1));
            }
        }
    }
}

/// Opens the database and applies the migrations.
pub async fn open_repo(conf: &Conf) -> anyhow::Result<DynLadderRepo> {
    if let Some(folder) = conf.database_file.parent().filter(|folder| !folder.as_str().is_empty()) {
        std::fs::create_dir_all(folder).with_context(|| format!("failed to create database folder at {folder}"))?;
    }

    let repo = LibSqlLadderRepo::open(conf.database_file.as_str())
        .await
        .with_context(|| format!("failed to open database at {}", conf.database_file))?;

    repo.setup().await.context("failed to setup database")?;

    Ok(Arc::new(repo))
}

/// Builds the monitor on top of `repo`, storing the configured API credentials.
pub async fn build_monitor(conf: &Conf, repo: DynLadderRepo) -> anyhow::Result<Monitor> {
    let monitor = Monitor::with_api_conf(repo, conf.api_conf())?;

    match (conf.api_key.as_deref(), conf.api_secret.as_deref()) {
        (Some(key), Some(secret)) => monitor
            .set_credentials(key, secret)
            .await
            .context("failed to store API credentials")?,
        (None, None) => debug!("No API credentials in configuration, using the stored ones"),
        _ => warn!("Both ApiKey and ApiSecret must be set, ignoring the partial credentials"),
    }

    Ok(monitor)
}

async fn spawn_tasks(conf: Arc<Conf>, db_log_receiver: DbLogReceiver) -> anyhow::Result<TaskSet> {
    let repo = open_repo(&conf).await?;

    let mut tasks = TaskSet::new();

    tasks.register(LogWriterTask::new(Arc::clone(&repo), db_log_receiver));
    tasks.register(LogPurgeTask::new(Arc::clone(&repo), conf.log_retention));
    tasks.register(LogDeleterTask::<MonitorLog>::new(conf.log_file.clone()));

    let monitor = build_monitor(&conf, repo).await?;

    let added = monitor.add_players(&conf.players).await;
    info!(added, configured = conf.players.len(), "Configured players registered");

    tasks.register(PollingTask::new(Arc::new(monitor), conf.update_interval));

    Ok(tasks)
}
