//! Host event fan-out.
//!
//! Every process publishes its lifecycle and stream traffic on one bus.
//! Consumers subscribe, optionally filtered by event kind, and correlate by
//! [`ProcessHandle`]. Delivery is lossless and ordered per publisher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::cli::{AgentEvent, TerminalResult};
use crate::supervisor::ProcessHandle;

/// Event published by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    /// A streaming or buffered process started.
    StreamStart { handle: ProcessHandle },
    /// Text fragment from a streaming turn.
    StreamText { handle: ProcessHandle, text: String },
    /// Any classified stream record, with its raw JSON.
    StreamEvent {
        handle: ProcessHandle,
        event: AgentEvent,
        raw: serde_json::Value,
    },
    /// The process exited. `code` is `None` when killed by a signal.
    StreamEnd {
        handle: ProcessHandle,
        code: Option<i32>,
        session_id: Option<String>,
        result: Option<TerminalResult>,
        /// Bounded tail of stderr, or of stdout when stderr was empty.
        tail: String,
    },
    /// Diagnostic output.
    Stderr { handle: ProcessHandle, data: String },
    /// Raw stdout chunk of a buffered (non-streaming) invocation.
    Progress { handle: ProcessHandle, chunk: String },
}

/// Discriminant of [`HostEvent`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StreamStart,
    StreamText,
    StreamEvent,
    StreamEnd,
    Stderr,
    Progress,
}

impl HostEvent {
    /// Handle of the process that produced this event.
    #[must_use]
    pub fn handle(&self) -> &ProcessHandle {
        match self {
            Self::StreamStart { handle }
            | Self::StreamText { handle, .. }
            | Self::StreamEvent { handle, .. }
            | Self::StreamEnd { handle, .. }
            | Self::Stderr { handle, .. }
            | Self::Progress { handle, .. } => handle,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StreamStart { .. } => EventKind::StreamStart,
            Self::StreamText { .. } => EventKind::StreamText,
            Self::StreamEvent { .. } => EventKind::StreamEvent,
            Self::StreamEnd { .. } => EventKind::StreamEnd,
            Self::Stderr { .. } => EventKind::Stderr,
            Self::Progress { .. } => EventKind::Progress,
        }
    }
}

/// One registered consumer.
#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<HostEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl Subscriber {
    fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

/// Fan-out of host events to every subscriber.
///
/// Each subscriber has its own bounded queue. Publishing waits for room, so
/// a slow consumer applies backpressure to the processes feeding it instead
/// of losing events. A subscription that is never read will eventually
/// stall publishers; drop it when no longer needed.
#[derive(Debug, Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus that queues up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to every matching subscriber, in publish order.
    ///
    /// Having no subscribers is not an error.
    pub async fn publish(&self, event: HostEvent) {
        let kind = event.kind();
        let targets: Vec<_> = self
            .subscribers()
            .iter()
            .filter(|s| s.accepts(kind))
            .map(|s| s.tx.clone())
            .collect();
        if targets.is_empty() {
            tracing::trace!(?kind, "No subscribers for host event");
            return;
        }

        let mut closed = false;
        for tx in targets {
            if tx.send(event.clone()).await.is_err() {
                closed = true;
            }
        }
        if closed {
            let mut subscribers = self.subscribers();
            subscribers.retain(|s| !s.tx.is_closed());
            tracing::debug!(remaining = subscribers.len(), "Dropped closed subscribers");
        }
    }

    /// Subscribe to every event.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Subscribe to the given event kinds only.
    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        self.register(Some(kinds.to_vec()))
    }

    fn register(&self, kinds: Option<Vec<EventKind>>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers().push(Subscriber { tx, kinds });
        Subscription { rx }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

/// A registered event consumer. Dropping it deregisters.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<HostEvent>,
}

impl Subscription {
    /// Receive the next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<HostEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive of the next queued event.
    pub fn try_recv(&mut self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }

    /// Convert into a [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = HostEvent> {
        ReceiverStream::new(self.rx)
    }

    /// Deregister explicitly.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
