//! Long-running background tasks of the monitor and their cooperative shutdown.

#[macro_use]
extern crate tracing;

use core::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Sender side of the shutdown notification.
#[derive(Debug)]
pub struct ShutdownHandle(tokio::sync::watch::Sender<bool>);

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownSignal) {
        let (sender, receiver) = tokio::sync::watch::channel(false);
        (Self(sender), ShutdownSignal(receiver))
    }

    pub fn signal(&self) {
        let _ = self.0.send(true);
    }

    /// Resolves once every [`ShutdownSignal`] has been dropped.
    pub async fn all_closed(&self) {
        self.0.closed().await;
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal(tokio::sync::watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once shutdown is requested, or when the handle is gone.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|signaled| *signaled).await;
    }

    pub fn is_signaled(&self) -> bool {
        *self.0.borrow()
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    ///
    /// Returns `false` when interrupted by the shutdown signal.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

/// Aborts the running task when dropped.
#[must_use]
pub struct ChildTask<T>(JoinHandle<T>);

impl<T> ChildTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        ChildTask(tokio::task::spawn(future))
    }

    pub async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }

    pub fn abort(&self) {
        self.0.abort()
    }
}

impl<T> Drop for ChildTask<T> {
    fn drop(&mut self) {
        self.abort();
    }
}

#[async_trait]
pub trait Task {
    type Output: Send;

    const NAME: &'static str;

    async fn run(self, shutdown_signal: ShutdownSignal) -> Self::Output;
}

pub fn spawn_task<T>(task: T, shutdown_signal: ShutdownSignal) -> ChildTask<T::Output>
where
    T: Task + 'static,
{
    trace!(task = T::NAME, "Spawn task");
    ChildTask::spawn(task.run(shutdown_signal))
}

/// How long [`TaskSet::shutdown`] waits for the tasks to wind down.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    pub check_interval: Duration,
    pub max_checks: u32,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            max_checks: 3,
        }
    }
}

/// Registry of the service tasks, sharing a single shutdown signal.
pub struct TaskSet {
    children: Vec<(&'static str, ChildTask<anyhow::Result<()>>)>,
    shutdown_handle: ShutdownHandle,
    shutdown_signal: ShutdownSignal,
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSet {
    pub fn new() -> Self {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        Self {
            children: Vec::new(),
            shutdown_handle,
            shutdown_signal,
        }
    }

    pub fn register<T>(&mut self, task: T)
    where
        T: Task<Output = anyhow::Result<()>> + 'static,
    {
        let child = spawn_task(task, self.shutdown_signal.clone());
        self.children.push((T::NAME, child));
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Splits the registry into a future awaiting every task and the shutdown handle.
    ///
    /// Task outcomes are logged as they terminate.
    pub fn into_parts(self) -> (impl Future<Output = ()> + Send + 'static, ShutdownHandle) {
        let Self {
            children,
            shutdown_handle,
            shutdown_signal,
        } = self;

        // Only the tasks must hold a signal, otherwise `all_closed` never resolves.
        drop(shutdown_signal);

        let join_all = async move {
            let mut pending: Vec<_> = children
                .into_iter()
                .map(|(name, child)| Box::pin(async move { (name, child.join().await) }))
                .collect();

            while !pending.is_empty() {
                let ((name, result), _, rest) = futures::future::select_all(pending).await;

                match result {
                    Ok(Ok(())) => debug!(task = name, "Task terminated gracefully"),
                    Ok(Err(error)) => error!(task = name, error = format!("{error:#}"), "Task failed"),
                    Err(error) => error!(task = name, %error, "Something went very wrong with a task"),
                }

                pending = rest;
            }
        };

        (join_all, shutdown_handle)
    }
}

/// Signals shutdown, then waits for the tasks according to the policy.
///
/// Returns `false` if some tasks were still running when giving up.
pub async fn stop(shutdown_handle: &ShutdownHandle, policy: StopPolicy) -> bool {
    shutdown_handle.signal();

    let mut count = 0;

    loop {
        tokio::select! {
            _ = shutdown_handle.all_closed() => {
                debug!("All tasks are terminated");
                return true;
            }
            _ = tokio::time::sleep(policy.check_interval) => {
                count += 1;

                if count >= policy.max_checks {
                    warn!("Terminate forcefully the lingering tasks");
                    return false;
                } else {
                    warn!("Termination of certain tasks is experiencing significant delays");
                }
            }
        }
    }
}
