//! Typed publish/subscribe for editor events.
//!
//! Each `subscribe` call registers one listener and returns a
//! [`Subscription`]; dropping it (or calling `unsubscribe`) removes exactly
//! that listener. Any number of listeners may observe the same event kind.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::storage::HeadingMarking;
use crate::types::{ChangeOrigin, ScrollBehavior, Selection};

/// Which events a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Content-affecting changes, local or remote.
    Update,
    /// Every state transition, including selection-only changes.
    Transaction,
    Focus,
    Blur,
    /// A host view should scroll.
    Scroll,
    /// The editor was torn down.
    Destroy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Update {
        origin: ChangeOrigin,
        headings: Rc<[HeadingMarking]>,
    },
    Transaction {
        origin: ChangeOrigin,
        selection: Selection,
        doc_changed: bool,
    },
    Focus {
        position: usize,
    },
    Blur,
    Scroll {
        position: usize,
        behavior: ScrollBehavior,
    },
    Destroy,
}

impl EditorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Update { .. } => EventKind::Update,
            Self::Transaction { .. } => EventKind::Transaction,
            Self::Focus { .. } => EventKind::Focus,
            Self::Blur => EventKind::Blur,
            Self::Scroll { .. } => EventKind::Scroll,
            Self::Destroy => EventKind::Destroy,
        }
    }
}

type Listener = Rc<dyn Fn(&EditorEvent)>;

struct Entry {
    id: u64,
    kind: EventKind,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    entries: RefCell<Vec<Entry>>,
    next_id: Cell<u64>,
}

/// Event fan-out for one editor.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Rc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, listener: impl Fn(&EditorEvent) + 'static) -> Subscription {
        let id = self.registry.next_id.get();
        self.registry.next_id.set(id + 1);
        self.registry.entries.borrow_mut().push(Entry {
            id,
            kind,
            listener: Rc::new(listener),
        });
        Subscription {
            registry: Rc::downgrade(&self.registry),
            id,
        }
    }

    /// Deliver an event to every listener of its kind.
    ///
    /// Listeners may subscribe or unsubscribe while being called; a listener
    /// removed mid-dispatch is not called afterwards.
    pub fn emit(&self, event: &EditorEvent) {
        let kind = event.kind();
        let targets: Vec<(u64, Listener)> = self
            .registry
            .entries
            .borrow()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| (e.id, e.listener.clone()))
            .collect();
        for (id, listener) in targets {
            let live = self.registry.entries.borrow().iter().any(|e| e.id == id);
            if live {
                listener(event);
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry
            .entries
            .borrow()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.registry.entries.borrow_mut().clear();
    }
}

/// Handle for one listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<Registry>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the listener registered for the lifetime of the bus.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.entries.borrow_mut().retain(|e| e.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_subscribers_stack() {
        let bus = EventBus::new();
        let hits = Rc::new(Cell::new(0));
        let a = {
            let hits = hits.clone();
            bus.subscribe(EventKind::Blur, move |_| hits.set(hits.get() + 1))
        };
        let _b = {
            let hits = hits.clone();
            bus.subscribe(EventKind::Blur, move |_| hits.set(hits.get() + 10))
        };
        bus.emit(&EditorEvent::Blur);
        assert_eq!(hits.get(), 11);

        a.unsubscribe();
        bus.emit(&EditorEvent::Blur);
        assert_eq!(hits.get(), 21);
        assert_eq!(bus.listener_count(EventKind::Blur), 1);
    }

    #[test]
    fn test_kinds_are_filtered() {
        let bus = EventBus::new();
        let hits = Rc::new(Cell::new(0));
        let _sub = {
            let hits = hits.clone();
            bus.subscribe(EventKind::Focus, move |_| hits.set(hits.get() + 1))
        };
        bus.emit(&EditorEvent::Blur);
        bus.emit(&EditorEvent::Focus { position: 1 });
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let bus = EventBus::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::default();
        let hits = Rc::new(Cell::new(0));

        let _first = {
            let slot = slot.clone();
            bus.subscribe(EventKind::Blur, move |_| {
                slot.borrow_mut().take();
            })
        };
        let second = {
            let hits = hits.clone();
            bus.subscribe(EventKind::Blur, move |_| hits.set(hits.get() + 1))
        };
        *slot.borrow_mut() = Some(second);

        bus.emit(&EditorEvent::Blur);
        assert_eq!(hits.get(), 0);
        assert_eq!(bus.listener_count(EventKind::Blur), 1);
    }

    #[test]
    fn test_subscription_outliving_bus() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::Destroy, |_| {});
        drop(bus);
        drop(sub);
    }
}
