use std::io;
use std::marker::PhantomData;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use sc2monitor_task::{ShutdownSignal, Task};
use tokio::fs;
use tokio::time::Duration;

use crate::{LogPath, StaticLogConfig};

const TASK_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24); // once per day
const MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 90); // 90 days

/// File deletion task (by age)
///
/// Given path is used to filter out by file name prefix.
pub struct LogDeleterTask<C: StaticLogConfig> {
    path: Utf8PathBuf,
    _phantom: PhantomData<C>,
}

impl<C: StaticLogConfig> LogDeleterTask<C> {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<C: StaticLogConfig + Send> Task for LogDeleterTask<C> {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "log deleter";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        let log_path = LogPath::resolve::<C>(&self.path)?;

        loop {
            match delete_old_log_files(log_path.folder, log_path.prefix, MAX_AGE).await {
                Ok(deleted) => trace!(deleted, "Log folder scanned"),
                Err(error) => warn!(%error, "Couldn't read log folder"),
            }

            if !shutdown_signal.sleep(TASK_INTERVAL).await {
                break;
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}

/// Deletes the log files of `folder` starting with `prefix` last modified more than `max_age` ago.
///
/// Returns the number of deleted files.
pub async fn delete_old_log_files(folder: &Utf8Path, prefix: &str, max_age: Duration) -> io::Result<usize> {
    let mut read_dir = fs::read_dir(folder).await?;
    let mut deleted = 0;

    while let Some(entry) = read_dir.next_entry().await? {
        let file_name = entry.file_name();

        let Some(file_name) = file_name.to_str() else {
            continue;
        };

        if !file_name.starts_with(prefix) || !file_name.contains("log") {
            continue;
        }

        let age = entry
            .metadata()
            .await
            .and_then(|metadata| metadata.modified())
            .and_then(|time| time.elapsed().map_err(io::Error::other));

        match age {
            Ok(age) if age > max_age => {
                info!(file_name, "Delete log file");
                match fs::remove_file(entry.path()).await {
                    Ok(()) => deleted += 1,
                    Err(error) => warn!(%error, file_name, "Couldn't delete log file"),
                }
            }
            Ok(_) => trace!(file_name, "Keep this log file"),
            Err(error) => warn!(%error, file_name, "Couldn't retrieve metadata for file"),
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn touch(folder: &Utf8Path, name: &str, age: Duration) {
        let file = std::fs::File::create(folder.join(name)).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn only_old_prefixed_log_files_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let folder = Utf8Path::from_path(dir.path()).unwrap();

        let old = Duration::from_secs(60 * 60 * 24 * 100);
        touch(folder, "sc2monitor.1.log", old);
        touch(folder, "sc2monitor.2.log", Duration::ZERO);
        touch(folder, "other.log", old);
        touch(folder, "sc2monitor.db", old);

        let deleted = delete_old_log_files(folder, "sc2monitor", MAX_AGE).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(!folder.join("sc2monitor.1.log").exists());
        assert!(folder.join("sc2monitor.2.log").exists());
        assert!(folder.join("other.log").exists());
        assert!(folder.join("sc2monitor.db").exists());
    }

    #[tokio::test]
    async fn missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let folder = Utf8Path::from_path(dir.path()).unwrap().join("missing");

        assert!(delete_old_log_files(&folder, "sc2monitor", MAX_AGE).await.is_err());
    }
}
