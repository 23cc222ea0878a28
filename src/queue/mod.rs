//! FIFO command queue in front of a single-capacity hardware transport.
//!
//! One polling task dequeues the head command, runs it to completion, then
//! waits a fixed interval before the next poll. When the queue is empty an
//! idle placeholder runs instead so newly submitted work is picked up within
//! one interval.
//!
//! Cancellation is cooperative: [`CommandQueue::clear`] and
//! [`CommandQueue::close`] abort only commands that have not been dequeued.
//! A command already executing always runs to completion.

mod command;

pub use command::{Command, CommandReceipt, DeviceCommand};

use crate::config::QueueConfig;
use command::Idle;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Abort reason for commands still queued when the last handle is dropped
const DROPPED: &str = "queue dropped";

/// Serializes commands against a transport that handles one at a time.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

struct Inner {
    commands: Mutex<VecDeque<Box<dyn Command>>>,
    running: AtomicBool,
    /// Bumped on every start so a poller from an earlier run retires itself
    generation: AtomicU64,
    wake: Notify,
    /// Held while a command executes
    transport: tokio::sync::Mutex<()>,
    poll_interval: Duration,
}

impl CommandQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_interval(Duration::from_millis(config.poll_interval_ms))
    }

    pub fn with_interval(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                commands: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                wake: Notify::new(),
                transport: tokio::sync::Mutex::new(()),
                poll_interval,
            }),
        }
    }

    /// Append a command to the tail of the queue. Never blocks on execution.
    pub fn submit<C: Command + 'static>(&self, command: C) {
        self.submit_boxed(Box::new(command));
    }

    pub fn submit_boxed(&self, command: Box<dyn Command>) {
        let mut commands = self.inner.commands();
        debug!(kind = command.kind(), queued = commands.len() + 1, "Command submitted");
        commands.push_back(command);
    }

    /// Start polling. A no-op while already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Command queue already running");
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            poll_interval_ms = self.inner.poll_interval.as_millis() as u64,
            "Command queue started"
        );
        tokio::spawn(poll_commands(Arc::downgrade(&self.inner), generation));
    }

    /// Cancel the next scheduled poll. An executing command is left to finish.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            self.inner.wake.notify_waiters();
            info!("Command queue stopped");
        }
    }

    /// Stop polling, then abort everything still queued.
    pub fn close(&self, reason: &str) {
        self.stop();
        self.clear(reason);
    }

    /// Abort and remove every queued command without stopping the poller.
    pub fn clear(&self, reason: &str) {
        let drained: Vec<Box<dyn Command>> = self.inner.commands().drain(..).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), reason, "Aborting queued commands");
        }
        // Abort outside the lock; abort handlers may submit
        for command in drained {
            command.abort(reason);
        }
    }

    /// Inspect the most recently submitted command that has not been dequeued.
    pub fn peek_last<R>(&self, inspect: impl FnOnce(&dyn Command) -> R) -> Option<R> {
        self.inner
            .commands()
            .back()
            .map(|command| inspect(command.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.inner.commands().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.commands().is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("queued", &self.len())
            .field("running", &self.is_running())
            .field("poll_interval", &self.inner.poll_interval)
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let commands = self.commands.get_mut().unwrap_or_else(PoisonError::into_inner);
        for command in commands.drain(..) {
            command.abort(DROPPED);
        }
    }
}

impl Inner {
    fn commands(&self) -> MutexGuard<'_, VecDeque<Box<dyn Command>>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }
}

async fn poll_commands(queue: Weak<Inner>, generation: u64) {
    // Exits once every queue handle has been dropped
    while let Some(inner) = queue.upgrade() {
        if !inner.is_current(generation) {
            break;
        }

        {
            // Nothing is dequeued until the transport is free, so a command
            // waiting on an earlier run stays abortable
            let _transport = inner.transport.lock().await;
            if !inner.is_current(generation) {
                break;
            }
            let next = inner.commands().pop_front();
            let mut command: Box<dyn Command> = next.unwrap_or_else(|| Box::new(Idle));
            if let Err(e) = command.execute().await {
                warn!(kind = command.kind(), error = %e, "Command queue caught unexpected error");
            }
        }

        if !inner.is_current(generation) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(inner.poll_interval) => {}
            _ = inner.wake.notified() => {}
        }
    }
    debug!(generation, "Command queue poller exited");
}
