//! Dedicated event-loop threads and blocking calls into them

use crate::error::{BotError, Result};
use crate::transport::Role;
use std::future::Future;
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{error, warn};

/// A single-threaded runtime running on its own OS thread
pub struct LoopThread {
    runtime: Handle,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    stop: Option<oneshot::Sender<()>>,
}

/// Spawn a thread with a fresh current-thread runtime and run `body` on it.
/// `body` gets a stop signal and the thread ends when `body` returns; tasks
/// it spawned are cancelled with the runtime.
pub fn spawn_loop<F, Fut>(role: Role, body: F) -> Result<LoopThread>
where
    F: FnOnce(oneshot::Receiver<()>) -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let (handle_tx, handle_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = oneshot::channel();

    let thread = thread::Builder::new()
        .name(format!("copytrade-{role}"))
        .spawn(move || {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Failed to build {} event loop: {}", role, e);
                    return;
                }
            };
            let _ = handle_tx.send(runtime.handle().clone());
            runtime.block_on(body(stop_rx));
        })?;

    let runtime = handle_rx
        .recv()
        .map_err(|_| BotError::Runtime(format!("{role} event loop failed to start")))?;

    Ok(LoopThread {
        runtime,
        thread_id: thread.thread().id(),
        thread: Some(thread),
        stop: Some(stop_tx),
    })
}

impl LoopThread {
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// True when called from this loop's own thread, where blocking on the
    /// loop would deadlock
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `fut` on this loop and wait for its result
    pub fn call<F, T>(&self, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Err(BotError::Runtime("blocking call from inside the event loop".into()));
        }
        call(&self.runtime, timeout, fut)
    }

    /// Signal the loop to stop and wait up to `timeout` for the thread
    pub fn stop(&mut self, timeout: Duration) -> bool {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(thread) = self.thread.take() else {
            return true;
        };

        let name = thread.thread().name().unwrap_or("event loop").to_string();
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if thread.is_finished() {
            if thread.join().is_err() {
                warn!("Thread {} panicked", name);
            }
            true
        } else {
            warn!("Thread {} did not stop within {:?}", name, timeout);
            false
        }
    }
}

/// Schedule `fut` on `runtime` from another thread and block for the result.
/// The task is cancelled if it does not finish in time.
pub fn call<F, T>(runtime: &Handle, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let task = runtime.spawn(async move {
        let _ = tx.send(fut.await);
    });
    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            task.abort();
            Err(BotError::Timeout(format!("no response from event loop in {timeout:?}")))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(BotError::Runtime("event loop is not running".into()))
        }
    }
}

/// Run `fut` to completion on a short-lived loop of its own
pub fn run_detached<F, T>(name: &str, fut: F) -> Result<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let thread = thread::Builder::new()
        .name(format!("copytrade-{name}"))
        .spawn(move || -> Result<T> {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            Ok(runtime.block_on(fut))
        })?;
    thread
        .join()
        .map_err(|_| BotError::Runtime(format!("{name} task panicked")))?
}
