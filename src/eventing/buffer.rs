//! Event Buffer
//!
//! Time/size bounded coalescing queue in front of a consumer. Rapid bursts of
//! stream events are delivered as one batch instead of one update per message.
//!
//! The queue is owned by a single task fed through an unbounded channel, so
//! pushes never block and batches reach `on_flush` strictly in arrival order:
//!
//! ```text
//! push ──► mpsc ──► buffer task ──► on_flush(batch)
//!                      │
//!                      └── idle timer (restarted by every push)
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::constants::{EVENT_BUFFER_DELAY_MS, EVENT_BUFFER_MAX_ITEMS};
use crate::error::{Error, Result};
use crate::services::runtime;

/// Buffer sizing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    /// A push that makes the queue exceed this flushes immediately
    pub max_items: usize,
    /// Idle time after the last push before flushing
    pub delay: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_items: EVENT_BUFFER_MAX_ITEMS,
            delay: Duration::from_millis(EVENT_BUFFER_DELAY_MS),
        }
    }
}

enum Command<T> {
    Push(T),
    Flush,
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running event buffer
///
/// Dropping the last handle flushes whatever is queued and stops the task.
pub struct EventBuffer<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> EventBuffer<T> {
    /// Spawn a buffer with default sizing
    pub fn spawn<F>(on_flush: F) -> Self
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        Self::with_config(on_flush, BufferConfig::default())
    }

    /// Spawn a buffer with explicit sizing
    pub fn with_config<F>(on_flush: F, config: BufferConfig) -> Self
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime::spawn_task(run_buffer(rx, on_flush, config));
        Self {
            tx,
            task: Some(task),
        }
    }

    /// Queue an item
    pub fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(Command::Push(item))
            .map_err(|_| Error::ChannelSend {
                message: "event buffer stopped".to_string(),
            })
    }

    /// Deliver everything queued so far and clear the idle timer
    pub fn flush(&self) -> Result<()> {
        self.tx.send(Command::Flush).map_err(|_| Error::ChannelSend {
            message: "event buffer stopped".to_string(),
        })
    }

    /// Flush remaining items and wait for the task to finish
    pub async fn shutdown(mut self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<T> Drop for EventBuffer<T> {
    fn drop(&mut self) {
        // Closing the channel makes the task flush and exit on its own.
        if let Some(task) = self.task.take() {
            drop(task);
        }
    }
}

impl<T> std::fmt::Debug for EventBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

async fn run_buffer<T, F>(mut rx: mpsc::UnboundedReceiver<Command<T>>, mut on_flush: F, config: BufferConfig)
where
    F: FnMut(Vec<T>),
{
    let mut queue: Vec<T> = Vec::new();
    let mut deadline: Option<Instant> = None;

    let mut deliver = |queue: &mut Vec<T>, deadline: &mut Option<Instant>| {
        *deadline = None;
        if queue.is_empty() {
            return;
        }
        let batch = std::mem::take(queue);
        tracing::trace!("Flushing {} buffered items", batch.len());
        on_flush(batch);
    };

    loop {
        let command = match deadline {
            Some(at) => tokio::select! {
                biased;
                command = rx.recv() => command,
                _ = sleep_until(at) => {
                    deliver(&mut queue, &mut deadline);
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match command {
            Some(Command::Push(item)) => {
                queue.push(item);
                if queue.len() > config.max_items {
                    deliver(&mut queue, &mut deadline);
                } else {
                    deadline = Some(Instant::now() + config.delay);
                }
            }
            Some(Command::Flush) => deliver(&mut queue, &mut deadline),
            Some(Command::Shutdown(done)) => {
                deliver(&mut queue, &mut deadline);
                let _ = done.send(());
                break;
            }
            None => {
                deliver(&mut queue, &mut deadline);
                break;
            }
        }
    }

    tracing::debug!("Event buffer stopped");
}
