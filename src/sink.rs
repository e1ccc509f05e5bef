//! Result routing for scheduled tasks.
//!
//! Tasks that produce a payload hand it to the runner, which forwards it to
//! whatever [`ResultSink`] was attached. The stock implementation is
//! [`ChannelSink`], which pushes updates onto an unbounded channel for a
//! consumer elsewhere in the process.

use tokio::sync::mpsc;
use tracing::debug;

/// A task result as delivered to sink consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate<P> {
    /// Name of the task that produced the payload.
    pub task: String,
    pub payload: P,
}

/// Destination for task results.
///
/// `publish` runs on the dispatch loop and must not block; delivery
/// failures are logged, never propagated to the task.
pub trait ResultSink<P>: Send + Sync {
    fn publish(&self, task: &str, payload: P);
}

/// Sink that forwards results over an unbounded channel.
///
/// The caller keeps the receiving half; a closed receiver downgrades
/// publishing to a debug log.
pub struct ChannelSink<P> {
    tx: mpsc::UnboundedSender<TaskUpdate<P>>,
}

impl<P> ChannelSink<P> {
    pub fn new(tx: mpsc::UnboundedSender<TaskUpdate<P>>) -> Self {
        Self { tx }
    }
}

impl<P> ResultSink<P> for ChannelSink<P>
where
    P: Send,
{
    fn publish(&self, task: &str, payload: P) {
        let update = TaskUpdate {
            task: task.to_owned(),
            payload,
        };
        if self.tx.send(update).is_err() {
            debug!("result channel closed, dropping update from '{task}'");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn publishes_to_the_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        sink.publish("refresh_cache", 42);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.task, "refresh_cache");
        assert_eq!(update.payload, 42);
    }

    #[test]
    fn closed_channel_drops_the_update_without_panicking() {
        let (tx, rx) = mpsc::unbounded_channel::<TaskUpdate<u32>>();
        drop(rx);

        let sink = ChannelSink::new(tx);
        sink.publish("refresh_cache", 1);
    }
}
