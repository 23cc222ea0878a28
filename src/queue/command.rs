//! Units of work accepted by the [`CommandQueue`](super::CommandQueue).

use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::oneshot;

/// A queued call against the hardware transport.
///
/// The queue owns a command from `submit` until it calls exactly one of
/// [`Command::execute`] or [`Command::abort`].
#[async_trait]
pub trait Command: Send {
    /// Short label used for logging and deduplication.
    fn kind(&self) -> &str;

    /// Run against the transport. Any deadline is the command's own business.
    async fn execute(&mut self) -> Result<()>;

    /// Cancel a command that was never dequeued.
    fn abort(self: Box<Self>, reason: &str);
}

/// Placeholder executed when the queue is empty, keeping the poll cadence.
pub(crate) struct Idle;

pub(crate) const IDLE_KIND: &str = "emptyQueue";

#[async_trait]
impl Command for Idle {
    fn kind(&self) -> &str {
        IDLE_KIND
    }

    async fn execute(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(self: Box<Self>, _reason: &str) {}
}

/// Wraps a device call as a [`Command`], delivering its outcome through a
/// [`CommandReceipt`].
pub struct DeviceCommand<T> {
    kind: String,
    call: Option<BoxFuture<'static, Result<T>>>,
    reply: Option<oneshot::Sender<Result<T>>>,
}

/// Submitter's handle on the outcome of a [`DeviceCommand`].
pub struct CommandReceipt<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> DeviceCommand<T> {
    pub fn new<F>(kind: impl Into<String>, call: F) -> (Self, CommandReceipt<T>)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let command = Self {
            kind: kind.into(),
            call: Some(Box::pin(call)),
            reply: Some(tx),
        };
        (command, CommandReceipt { rx })
    }

    fn reply(&mut self, outcome: Result<T>) {
        if let Some(tx) = self.reply.take() {
            // Submitter may have stopped waiting
            let _ = tx.send(outcome);
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Command for DeviceCommand<T> {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&mut self) -> Result<()> {
        let Some(call) = self.call.take() else {
            return Ok(());
        };
        match call.await {
            Ok(value) => {
                self.reply(Ok(value));
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.reply(Err(e));
                Err(Error::Transport(message))
            }
        }
    }

    fn abort(mut self: Box<Self>, reason: &str) {
        self.call.take();
        self.reply(Err(Error::Aborted(reason.to_string())));
    }
}

impl<T> CommandReceipt<T> {
    /// Wait for the command to execute or be aborted.
    pub async fn outcome(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| Error::Aborted("command dropped before completion".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_delivers_value() {
        let (mut command, receipt) = DeviceCommand::new("getAddress", async { Ok(42u32) });
        assert_eq!(command.kind(), "getAddress");
        command.execute().await.unwrap();
        assert_eq!(receipt.outcome().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn failed_call_reports_transport_error_to_both_sides() {
        let (mut command, receipt) = DeviceCommand::<u32>::new("signMessage", async {
            Err(Error::Transport("device disconnected".to_string()))
        });
        let queue_side = command.execute().await.unwrap_err();
        assert!(matches!(queue_side, Error::Transport(_)));
        assert!(matches!(receipt.outcome().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn abort_delivers_reason() {
        let (command, receipt) = DeviceCommand::new("signMessage", async { Ok(()) });
        Box::new(command).abort("shutdown");
        assert!(matches!(
            receipt.outcome().await,
            Err(Error::Aborted(reason)) if reason == "shutdown"
        ));
    }
}
