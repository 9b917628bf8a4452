//! Output event stream of spawned targets.
//!
//! Every line a target writes to stdout or stderr is published on the
//! controller's [`EventBus`]. Subscriptions are per controller rather than per
//! process, so a subscriber attached before a spawn sees the new process's
//! output from its first line.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of target output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEvent {
    pub pid: u32,
    pub stream: OutputStream,
    pub line: String,
}

/// Fan-out of target output lines to any number of subscribers.
///
/// Unbounded per-subscriber queues: a probe counting occurrences must never
/// miss a line because it fell behind.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<TargetEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber. It receives every event published after this
    /// call returns.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        EventSubscription { rx }
    }

    /// Deliver an event to all live subscribers, dropping closed ones.
    pub fn publish(&self, event: TargetEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of subscriptions that have not been dropped.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

/// Receiving end of an [`EventBus`] subscription. Dropping it detaches.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<TargetEvent>,
}

impl EventSubscription {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<TargetEvent> {
        self.rx.recv().await
    }

    /// Take an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<TargetEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued so far.
    pub fn drain(&mut self) -> Vec<TargetEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Spawn a task that republishes each line of `reader` on `bus`.
pub(crate) fn forward_lines<R>(
    reader: R,
    pid: u32,
    stream: OutputStream,
    bus: EventBus,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::trace!(pid, ?stream, "{line}");
                    bus.publish(TargetEvent { pid, stream, line });
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(pid, ?stream, "output stream closed: {err}");
                    break;
                }
            }
        }
    })
}
