//! Progress events emitted while provisioning.
//!
//! The bus is a single unbounded channel: producers never block, even when no
//! consumer is attached yet. One long-lived drain task forwards events to a
//! reporter until its [`CancellationToken`] fires.
//!
//! Sends are fire-and-forget. A closed channel is logged at debug level and
//! never fails the caller.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Kind of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Intermediate progress inside a phase
    Progress,
    /// A phase finished successfully
    Checkpoint,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress => f.write_str("progress"),
            Self::Checkpoint => f.write_str("checkpoint"),
        }
    }
}

/// One progress event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Progress or checkpoint
    pub kind: EventKind,
    /// Human-readable message
    pub message: String,
}

impl Event {
    /// A progress event
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Progress,
            message: message.into(),
        }
    }

    /// A checkpoint event
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Checkpoint,
            message: message.into(),
        }
    }
}

/// Producer half of the event bus
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Send an event without blocking
    pub fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("event bus closed, dropping event");
        }
    }

    /// Send a progress event
    pub fn progress(&self, message: impl Into<String>) {
        self.send(Event::progress(message));
    }

    /// Send a checkpoint event
    pub fn checkpoint(&self, message: impl Into<String>) {
        self.send(Event::checkpoint(message));
    }
}

/// Consumer half of the event bus
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

/// Create a connected sender/receiver pair
pub fn event_bus() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl EventReceiver {
    /// Receive the next event, `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take every event already queued without waiting
    pub fn try_collect(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Forward events to `handler` until `cancel` fires.
    ///
    /// Events already queued when cancellation is observed are still delivered.
    /// The task resolves to the number of events handled.
    pub fn drain<F>(mut self, cancel: CancellationToken, mut handler: F) -> JoinHandle<usize>
    where
        F: FnMut(Event) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut handled = 0usize;
            loop {
                tokio::select! {
                    biased;
                    event = self.rx.recv() => match event {
                        Some(event) => {
                            handler(event);
                            handled += 1;
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => {
                        for event in self.try_collect() {
                            handler(event);
                            handled += 1;
                        }
                        break;
                    }
                }
            }
            debug!(handled, "event drain stopped");
            handled
        })
    }
}
