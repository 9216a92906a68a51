//! Blocking bridge into async code.
//!
//! [`AsyncRunner`] owns one background thread driving a current-thread tokio
//! runtime. Any thread, including one that already drives another runtime,
//! can submit a future to it and block until the result comes back.
//!
//! ```rust,ignore
//! // From plain synchronous code:
//! let info = run_sync(api.call_api("get_login_info", json!({})), None)??;
//!
//! // Or with an explicit runner handle:
//! let runner = AsyncRunner::new()?;
//! let n = runner.run(async { 42 }, Some(Duration::from_secs(1)))?;
//! ```
//!
//! The process-wide instance is created lazily by [`AsyncRunner::get_instance`]
//! and lives until [`AsyncRunner::shutdown_instance`] is called or the process
//! exits; its thread never keeps the process alive on its own.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::foundation::error::{RunnerError, RunnerResult};

/// Name of the background thread.
pub const RUNNER_THREAD_NAME: &str = "AsyncRunner-EventLoop";

/// How long [`AsyncRunner::new`] waits for the background runtime.
pub const RUNNER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

static INSTANCE: RwLock<Option<AsyncRunner>> = parking_lot::const_rwlock(None);

struct RunnerInner {
    handle: Handle,
    running: AtomicBool,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RunnerInner {
    fn stop(&self) -> Option<JoinHandle<()>> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop.lock().take() {
            let _ = tx.send(());
        }
        self.thread.lock().take()
    }
}

impl Drop for RunnerInner {
    fn drop(&mut self) {
        // Detach; the thread exits once its runtime sees the stop signal.
        let _ = self.stop();
    }
}

/// Handle to a background runtime thread. Cloning shares the same thread.
#[derive(Clone)]
pub struct AsyncRunner {
    inner: Arc<RunnerInner>,
}

impl AsyncRunner {
    /// Starts a new background runtime thread.
    pub fn new() -> RunnerResult<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(RUNNER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                debug!("Async runner loop stopped");
            })
            .map_err(|e| RunnerError::StartupFailed(e.to_string()))?;

        let handle = match handle_rx.recv_timeout(RUNNER_STARTUP_TIMEOUT) {
            Ok(Ok(handle)) => handle,
            Ok(Err(reason)) => return Err(RunnerError::StartupFailed(reason)),
            Err(_) => {
                return Err(RunnerError::StartupFailed(format!(
                    "runtime did not start within {RUNNER_STARTUP_TIMEOUT:?}"
                )));
            }
        };

        debug!(thread = RUNNER_THREAD_NAME, "Async runner started");
        Ok(Self {
            inner: Arc::new(RunnerInner {
                handle,
                running: AtomicBool::new(true),
                stop: Mutex::new(Some(stop_tx)),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Returns the process-wide runner, starting it on first use.
    pub fn get_instance() -> RunnerResult<Self> {
        if let Some(runner) = INSTANCE.read().as_ref().filter(|r| r.is_running()) {
            return Ok(runner.clone());
        }

        let mut slot = INSTANCE.write();
        if let Some(runner) = slot.as_ref().filter(|r| r.is_running()) {
            return Ok(runner.clone());
        }
        let runner = Self::new()?;
        *slot = Some(runner.clone());
        Ok(runner)
    }

    /// Stops the process-wide runner, if one was started.
    pub fn shutdown_instance() {
        if let Some(runner) = INSTANCE.write().take() {
            runner.shutdown();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Handle to the background runtime.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Runs `future` on the background runtime and blocks until it finishes.
    ///
    /// A panic inside the future is resumed on the calling thread. On timeout
    /// the future is aborted.
    ///
    /// `future` is built on the caller's thread, so it must not touch the
    /// runtime before its first poll. `tokio::time::sleep(..)` does and panics
    /// outside a runtime; wrap it in `async { .. }` or use
    /// [`run_with`](Self::run_with).
    pub fn run<F>(&self, future: F, timeout: Option<Duration>) -> RunnerResult<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.run_with(move || future, timeout)
    }

    /// Like [`run`](Self::run), but `make` builds the future on the runner
    /// thread.
    pub fn run_with<M, F>(&self, make: M, timeout: Option<Duration>) -> RunnerResult<F::Output>
    where
        M: FnOnce() -> F + Send + 'static,
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            warn!("Blocking on the async runner from inside a runtime, prefer awaiting directly");
        }
        if !self.is_running() {
            return Err(RunnerError::NotRunning);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let task = self.inner.handle.spawn(async move {
            let outcome = AssertUnwindSafe(async move { make().await })
                .catch_unwind()
                .await;
            let _ = tx.send(outcome);
        });

        let outcome = match timeout {
            Some(limit) => rx.recv_timeout(limit).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => {
                    task.abort();
                    RunnerError::Timeout(limit)
                }
                mpsc::RecvTimeoutError::Disconnected => RunnerError::NotRunning,
            })?,
            None => rx.recv().map_err(|_| RunnerError::NotRunning)?,
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Stops the background runtime and waits for its thread.
    ///
    /// Pending calls fail with [`RunnerError::NotRunning`].
    pub fn shutdown(&self) {
        let Some(thread) = self.inner.stop() else {
            return;
        };
        if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
            warn!("Async runner thread panicked during shutdown");
        }
        debug!("Async runner shut down");
    }
}

impl std::fmt::Debug for AsyncRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRunner")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Runs `future` on the process-wide [`AsyncRunner`].
pub fn run_sync<F>(future: F, timeout: Option<Duration>) -> RunnerResult<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    AsyncRunner::get_instance()?.run(future, timeout)
}

/// Runs the future built by `make` on the process-wide [`AsyncRunner`].
pub fn run_sync_with<M, F>(make: M, timeout: Option<Duration>) -> RunnerResult<F::Output>
where
    M: FnOnce() -> F + Send + 'static,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    AsyncRunner::get_instance()?.run_with(make, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_from_fresh_thread() {
        let value = std::thread::spawn(|| run_sync(async { 42 }, None))
            .join()
            .unwrap();
        assert_eq!(value, Ok(42));
    }

    #[test]
    fn test_singleton_is_shared() {
        let a = AsyncRunner::get_instance().unwrap();
        let b = AsyncRunner::get_instance().unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[test]
    fn test_run_awaits_timers() {
        let runner = AsyncRunner::new().unwrap();
        let value = runner.run(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                "done"
            },
            Some(Duration::from_secs(5)),
        );
        assert_eq!(value, Ok("done"));
    }

    #[test]
    fn test_run_timeout() {
        let runner = AsyncRunner::new().unwrap();
        let result = runner.run(
            async { tokio::time::sleep(Duration::from_secs(5)).await },
            Some(Duration::from_millis(20)),
        );
        assert_eq!(result, Err(RunnerError::Timeout(Duration::from_millis(20))));
        assert!(runner.is_running());
    }

    #[test]
    fn test_run_with_builds_future_on_runner() {
        let runner = AsyncRunner::new().unwrap();
        let result = runner.run_with(
            || tokio::time::sleep(Duration::from_secs(5)),
            Some(Duration::from_millis(20)),
        );
        assert_eq!(result, Err(RunnerError::Timeout(Duration::from_millis(20))));

        let thread = std::thread::spawn(|| {
            run_sync_with(
                || tokio::time::sleep(Duration::from_millis(5)),
                Some(Duration::from_secs(5)),
            )
        })
        .join()
        .unwrap();
        assert_eq!(thread, Ok(()));
    }

    #[test]
    fn test_error_returned_verbatim() {
        let runner = AsyncRunner::new().unwrap();
        let result = runner.run(async { Err::<(), _>("bad".to_string()) }, None);
        assert_eq!(result, Ok(Err("bad".to_string())));
    }

    #[test]
    fn test_panic_resumes_on_caller() {
        let runner = AsyncRunner::new().unwrap();
        let caught = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = runner.run(async { panic!("inside runner") }, None);
        }));
        assert!(caught.is_err());
        assert!(runner.is_running());
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let runner = AsyncRunner::new().unwrap();
        runner.shutdown();
        runner.shutdown();
        assert!(!runner.is_running());
        assert_eq!(runner.run(async { 1 }, None), Err(RunnerError::NotRunning));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_from_inside_runtime_thread() {
        let value = tokio::task::spawn_blocking(|| {
            AsyncRunner::new().and_then(|r| r.run(async { 7 }, None))
        })
        .await
        .unwrap();
        assert_eq!(value, Ok(7));
    }
}
