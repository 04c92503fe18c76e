//! State-change event publication.
//!
//! Events are fanned out over a broadcast channel; each subscription is a
//! lazily filtered live stream that ends when the subscriber drops it.
//! Slow subscribers that overflow the buffer skip the lagged events rather
//! than stalling the engine.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::types::{StateChangeEvent, VmId};

/// Subscription filter. An empty filter matches every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFilter {
    pub vm: Option<VmId>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_vm(vm: VmId) -> Self {
        Self { vm: Some(vm) }
    }

    pub fn matches(&self, event: &StateChangeEvent) -> bool {
        match self.vm {
            Some(vm) => event.vm == vm,
            None => true,
        }
    }
}

pub struct EventNotifier {
    tx: broadcast::Sender<StateChangeEvent>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: StateChangeEvent) {
        trace!(vm = %event.vm, from = ?event.from, to = ?event.to, "state change");
        let _ = self.tx.send(event);
    }

    /// A live stream of events matching `filter`. Dropping the stream is
    /// the unsubscribe.
    pub fn subscribe(
        &self,
        filter: EventFilter,
    ) -> impl Stream<Item = StateChangeEvent> + Send + Unpin {
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| {
            futures::future::ready(match item {
                Ok(event) if filter.matches(&event) => Some(event),
                _ => None,
            })
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
