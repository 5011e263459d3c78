//! Viewport-wide pointer listeners with scoped registration.
//!
//! The host forwards window-level pointer and touch events into a
//! [`Viewport`]. Listeners are held through a [`ListenerGuard`]; dropping the
//! guard is the only way to unregister, so a listener cannot outlive the
//! state that installed it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerEventKind {
    MouseMove,
    MouseUp,
    MouseLeave,
    TouchMove,
    TouchEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    /// Horizontal position in viewport coordinates.
    pub client_x: f64,
}

impl PointerEvent {
    pub fn new(kind: PointerEventKind, client_x: f64) -> Self {
        Self { kind, client_x }
    }
}

type Handler = Rc<dyn Fn(&PointerEvent)>;

#[derive(Default)]
struct Listeners {
    entries: RefCell<Vec<(u64, PointerEventKind, Handler)>>,
    next_id: Cell<u64>,
}

#[derive(Clone, Default)]
pub struct Viewport {
    listeners: Rc<Listeners>,
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, kind: PointerEventKind, handler: impl Fn(&PointerEvent) + 'static) -> ListenerGuard {
        let id = self.listeners.next_id.get();
        self.listeners.next_id.set(id + 1);
        self.listeners
            .entries
            .borrow_mut()
            .push((id, kind, Rc::new(handler)));
        ListenerGuard {
            listeners: Rc::downgrade(&self.listeners),
            id,
        }
    }

    /// Deliver a host event. Handlers may drop guards while running.
    pub fn dispatch(&self, event: &PointerEvent) {
        let targets: Vec<(u64, Handler)> = self
            .listeners
            .entries
            .borrow()
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(id, _, h)| (*id, h.clone()))
            .collect();
        for (id, handler) in targets {
            let live = self.listeners.entries.borrow().iter().any(|(i, _, _)| *i == id);
            if live {
                handler(event);
            }
        }
    }

    /// Total registered listeners, across all kinds.
    pub fn listener_count(&self) -> usize {
        self.listeners.entries.borrow().len()
    }
}

/// Registration handle. Unregisters on drop.
#[must_use = "dropping a ListenerGuard unregisters the listener"]
pub struct ListenerGuard {
    listeners: Weak<Listeners>,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.borrow_mut().retain(|(id, _, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_scopes_listener() {
        let viewport = Viewport::new();
        let seen = Rc::new(Cell::new(0.0));
        {
            let seen = seen.clone();
            let _guard = viewport.listen(PointerEventKind::MouseMove, move |e| seen.set(e.client_x));
            viewport.dispatch(&PointerEvent::new(PointerEventKind::MouseMove, 42.0));
            assert_eq!(viewport.listener_count(), 1);
        }
        assert_eq!(seen.get(), 42.0);
        assert_eq!(viewport.listener_count(), 0);

        viewport.dispatch(&PointerEvent::new(PointerEventKind::MouseMove, 7.0));
        assert_eq!(seen.get(), 42.0);
    }
}
