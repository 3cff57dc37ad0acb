use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ladder_store::{DynLadderRepo, LogRecord};
use sc2monitor_task::{ShutdownSignal, Task};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60); // once per hour

// Records emitted while persisting records would feed back into the channel.
const IGNORED_TARGETS: &[&str] = &["sc2monitor_log", "ladder_store_libsql", "libsql"];

/// Creates the tracing layer mirroring events into the database, and its receiving end.
pub fn db_log_channel(capacity: usize, level: LevelFilter) -> (DbLogLayer, DbLogReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    let layer = DbLogLayer {
        sender,
        level,
        dropped: Arc::clone(&dropped),
    };

    (layer, DbLogReceiver { receiver, dropped })
}

/// Turns tracing events into [`LogRecord`]s without blocking.
///
/// Records are dropped when the channel is full.
pub struct DbLogLayer {
    sender: mpsc::Sender<LogRecord>,
    level: LevelFilter,
    dropped: Arc<AtomicU64>,
}

pub struct DbLogReceiver {
    receiver: mpsc::Receiver<LogRecord>,
    dropped: Arc<AtomicU64>,
}

impl DbLogReceiver {
    /// Number of records dropped since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    pub async fn recv(&mut self) -> Option<LogRecord> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogRecord> {
        self.receiver.try_recv().ok()
    }
}

impl<S: Subscriber> Layer<S> for DbLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        if *metadata.level() > self.level {
            return;
        }

        let target = metadata.target();

        let ignored = IGNORED_TARGETS.iter().any(|ignored| {
            target == *ignored || target.strip_prefix(ignored).is_some_and(|rest| rest.starts_with("::"))
        });

        if ignored {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord::new(
            target,
            metadata.level().as_str(),
            &visitor.message,
            visitor.error.as_deref(),
        );

        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Formats the message followed by the other fields, the `error` field is kept apart.
#[derive(Default)]
struct RecordVisitor {
    message: String,
    error: Option<String>,
}

impl RecordVisitor {
    fn set_message(&mut self, message: &str) {
        if self.message.is_empty() {
            self.message.push_str(message);
        } else {
            self.message.insert_str(0, &format!("{message} "));
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        use fmt::Write as _;

        if !self.message.is_empty() {
            self.message.push(' ');
        }

        let _ = write!(self.message, "{name}={value}");
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.set_message(value),
            "error" => self.error = Some(value.to_owned()),
            name => self.push_field(name, format_args!("{value}")),
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if field.name() == "error" {
            self.error = Some(value.to_string());
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.set_message(&format!("{value:?}")),
            "error" => self.error = Some(format!("{value:?}")),
            name => self.push_field(name, format_args!("{value:?}")),
        }
    }
}

/// Persists the records received from the [`DbLogLayer`].
pub struct LogWriterTask {
    repo: DynLadderRepo,
    receiver: DbLogReceiver,
}

impl LogWriterTask {
    pub fn new(repo: DynLadderRepo, receiver: DbLogReceiver) -> Self {
        Self { repo, receiver }
    }

    async fn write(&self, record: LogRecord) {
        let dropped = self.receiver.take_dropped();

        if dropped > 0 {
            warn!(dropped, "Database log channel was full, records were dropped");
        }

        if let Err(error) = self.repo.push_log(record).await {
            warn!(error = format!("{error:#}"), "Failed to persist log record");
        }
    }
}

#[async_trait]
impl Task for LogWriterTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "database log writer";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        loop {
            tokio::select! {
                record = self.receiver.recv() => {
                    let Some(record) = record else {
                        break;
                    };
                    self.write(record).await;
                }
                _ = shutdown_signal.wait() => {
                    // Flush what is already queued.
                    self.receiver.receiver.close();
                    while let Some(record) = self.receiver.recv().await {
                        self.write(record).await;
                    }
                    break;
                }
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}

/// Periodically removes the database log records older than the retention period.
pub struct LogPurgeTask {
    repo: DynLadderRepo,
    retention: Duration,
}

impl LogPurgeTask {
    pub fn new(repo: DynLadderRepo, retention: Duration) -> Self {
        Self { repo, retention }
    }
}

#[async_trait]
impl Task for LogPurgeTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "database log purge";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        loop {
            let cutoff = OffsetDateTime::now_utc() - self.retention;

            match self.repo.purge_logs(cutoff).await {
                Ok(purged) if purged > 0 => info!(purged, "Purged old database log records"),
                Ok(_) => trace!("No database log record to purge"),
                Err(error) => warn!(error = format!("{error:#}"), "Failed to purge database log records"),
            }

            if !shutdown_signal.sleep(PURGE_INTERVAL).await {
                break;
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}
