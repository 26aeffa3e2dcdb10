//! Run-scoped notification hub.
//!
//! Decouples phase execution from observers (logging, progress UI, test
//! assertions). Publishers enqueue with [`NotificationHub::post`]; a single
//! drain point delivers queued events to current subscribers in publish
//! order. The hub is created at run start and owned by the run context —
//! there is no process-global instance.
//!
//! Handlers must not subscribe or unsubscribe from inside a delivery; the
//! subscriber table is borrowed for the duration of each event.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;

use stanza_model::RepId;

/// An event published during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CompilationStarted { rep: RepId },
    CompilationSuspended { rep: RepId },
    CompilationEnded { rep: RepId },
    CompilationFailed { rep: RepId, message: String },
    /// The whole run is aborting; published before the error reaches the
    /// caller.
    RunFailed { message: String },
    FileWritten { path: PathBuf },
    FilePruned { path: PathBuf },
}

/// Event name, used for subscription matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CompilationStarted,
    CompilationSuspended,
    CompilationEnded,
    CompilationFailed,
    RunFailed,
    FileWritten,
    FilePruned,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CompilationStarted { .. } => EventKind::CompilationStarted,
            Event::CompilationSuspended { .. } => EventKind::CompilationSuspended,
            Event::CompilationEnded { .. } => EventKind::CompilationEnded,
            Event::CompilationFailed { .. } => EventKind::CompilationFailed,
            Event::RunFailed { .. } => EventKind::RunFailed,
            Event::FileWritten { .. } => EventKind::FileWritten,
            Event::FilePruned { .. } => EventKind::FilePruned,
        }
    }
}

/// Handle returned by [`NotificationHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    kind: EventKind,
    handler: Box<dyn FnMut(&Event)>,
}

/// Pub/sub hub for one run. Single-threaded by construction: the run is
/// driven by one logical worker, so interior mutability is enough.
#[derive(Default)]
pub struct NotificationHub {
    queue: RefCell<VecDeque<Event>>,
    subscribers: RefCell<Vec<Subscriber>>,
    next_id: Cell<u64>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl FnMut(&Event) + 'static,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.subscribers.borrow_mut().push(Subscriber {
            id,
            kind,
            handler: Box::new(handler),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().retain(|s| s.id != id);
    }

    /// Enqueue an event. Delivery happens at the next [`drain`](Self::drain).
    pub fn post(&self, event: Event) {
        tracing::trace!(?event, "notification posted");
        self.queue.borrow_mut().push_back(event);
    }

    /// Deliver all queued events, in publish order, to current subscribers.
    /// Handlers may post further events; those are delivered in the same
    /// drain.
    pub fn drain(&self) {
        loop {
            let event = self.queue.borrow_mut().pop_front();
            let Some(event) = event else { break };
            let kind = event.kind();
            let mut subscribers = self.subscribers.borrow_mut();
            for subscriber in subscribers.iter_mut() {
                if subscriber.kind == kind {
                    (subscriber.handler)(&event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn rep(id: &str) -> RepId {
        RepId::new(id, "default")
    }

    #[test]
    fn delivers_in_publish_order() {
        let hub = NotificationHub::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        hub.subscribe(EventKind::CompilationStarted, move |event| {
            if let Event::CompilationStarted { rep } = event {
                sink.borrow_mut().push(rep.item.to_string());
            }
        });

        hub.post(Event::CompilationStarted { rep: rep("/a.md") });
        hub.post(Event::CompilationStarted { rep: rep("/b.md") });
        assert!(seen.borrow().is_empty(), "no delivery before drain");

        hub.drain();
        assert_eq!(*seen.borrow(), vec!["/a.md", "/b.md"]);
    }

    #[test]
    fn subscription_is_per_kind() {
        let hub = NotificationHub::new();
        let count = Rc::new(Cell::new(0usize));
        let sink = Rc::clone(&count);
        hub.subscribe(EventKind::CompilationEnded, move |_| {
            sink.set(sink.get() + 1);
        });

        hub.post(Event::CompilationStarted { rep: rep("/a.md") });
        hub.post(Event::CompilationEnded { rep: rep("/a.md") });
        hub.drain();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = NotificationHub::new();
        let count = Rc::new(Cell::new(0usize));
        let sink = Rc::clone(&count);
        let id = hub.subscribe(EventKind::FileWritten, move |_| {
            sink.set(sink.get() + 1);
        });

        hub.post(Event::FileWritten {
            path: "/out/a.html".into(),
        });
        hub.drain();
        hub.unsubscribe(id);
        hub.post(Event::FileWritten {
            path: "/out/b.html".into(),
        });
        hub.drain();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn handler_may_post_during_drain() {
        let hub = Rc::new(NotificationHub::new());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let hub_for_handler = Rc::clone(&hub);
        let first = Rc::new(Cell::new(true));
        hub.subscribe(EventKind::CompilationStarted, move |_| {
            if first.get() {
                first.set(false);
                hub_for_handler.post(Event::CompilationStarted { rep: rep("/b.md") });
            }
        });
        let sink = Rc::clone(&seen);
        hub.subscribe(EventKind::CompilationStarted, move |event| {
            if let Event::CompilationStarted { rep } = event {
                sink.borrow_mut().push(rep.item.to_string());
            }
        });

        hub.post(Event::CompilationStarted { rep: rep("/a.md") });
        hub.drain();
        assert_eq!(*seen.borrow(), vec!["/a.md", "/b.md"]);
    }
}
