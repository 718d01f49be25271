/*! Typed publish/subscribe signals.

A [`Signal`] is a list of slots (callbacks) invoked in connection order
on every [`Signal::emit`]. Emission is total: every slot runs even if an
earlier one panics — the panic is caught and logged, never propagated,
so one misbehaving subscriber cannot starve the others or unwind the
event loop. Slots may connect and disconnect freely from inside a slot.
*/
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use log::error;

/// Identifies a connected slot for later disconnection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

struct Slot<T> {
    id: SlotId,
    oneshot: bool,
    func: Rc<RefCell<dyn FnMut(&T)>>,
}

struct Inner<T> {
    next_id: u64,
    slots: Vec<Slot<T>>,
}

/// A multi-subscriber signal carrying values of type `T`.
///
/// Cloning a `Signal` yields another handle on the same subscriber
/// list, which is how components share their signals with observers.
pub struct Signal<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    /// Create a signal with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    fn connect_slot(&self, func: impl FnMut(&T) + 'static, oneshot: bool) -> SlotId {
        let mut inner = self.inner.borrow_mut();
        let id = SlotId(inner.next_id);
        inner.next_id += 1;
        inner.slots.push(Slot {
            id,
            oneshot,
            func: Rc::new(RefCell::new(func)),
        });
        id
    }

    /// Connect a slot, called on every emission until disconnected.
    pub fn connect(&self, func: impl FnMut(&T) + 'static) -> SlotId {
        self.connect_slot(func, false)
    }

    /// Connect a slot called exactly once, then disconnected.
    pub fn connect_oneshot(&self, func: impl FnMut(&T) + 'static) -> SlotId {
        self.connect_slot(func, true)
    }

    /// Disconnect a slot. Returns whether it was still connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.slots.len();
        inner.slots.retain(|slot| slot.id != id);
        inner.slots.len() != before
    }

    /// Whether the given slot is still connected.
    #[must_use]
    pub fn is_connected(&self, id: SlotId) -> bool {
        self.inner.borrow().slots.iter().any(|slot| slot.id == id)
    }

    /// Number of connected slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    /// Whether no slots are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every connected slot with `value`.
    ///
    /// Slots connected during emission are not called until the next
    /// emission; one-shot slots are disconnected before their call so
    /// that re-entrant emission cannot run them twice.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(SlotId, bool, Rc<RefCell<dyn FnMut(&T)>>)> = self
            .inner
            .borrow()
            .slots
            .iter()
            .map(|slot| (slot.id, slot.oneshot, Rc::clone(&slot.func)))
            .collect();
        for (id, oneshot, func) in snapshot {
            if oneshot {
                if !self.disconnect(id) {
                    // Already removed by an earlier slot this emission.
                    continue;
                }
            } else if !self.is_connected(id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (func.borrow_mut())(value))).is_err() {
                error!("signal slot panicked; continuing with remaining slots");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_to_all_slots() {
        let sig: Signal<u32> = Signal::new();
        let hits = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let hits = Rc::clone(&hits);
            sig.connect(move |v| hits.borrow_mut().push((tag, *v)));
        }
        sig.emit(&7);
        assert_eq!(*hits.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn oneshot_fires_once() {
        let sig: Signal<()> = Signal::new();
        let count = Rc::new(RefCell::new(0));
        {
            let count = Rc::clone(&count);
            sig.connect_oneshot(move |()| *count.borrow_mut() += 1);
        }
        sig.emit(&());
        sig.emit(&());
        assert_eq!(*count.borrow(), 1);
        assert!(sig.is_empty());
    }

    #[test]
    fn disconnect_stops_delivery() {
        let sig: Signal<()> = Signal::new();
        let count = Rc::new(RefCell::new(0));
        let id = {
            let count = Rc::clone(&count);
            sig.connect(move |()| *count.borrow_mut() += 1)
        };
        sig.emit(&());
        assert!(sig.disconnect(id));
        assert!(!sig.disconnect(id));
        sig.emit(&());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn panicking_slot_does_not_starve_others() {
        let sig: Signal<()> = Signal::new();
        let count = Rc::new(RefCell::new(0));
        sig.connect(|()| panic!("boom"));
        {
            let count = Rc::clone(&count);
            sig.connect(move |()| *count.borrow_mut() += 1);
        }
        sig.emit(&());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn connect_during_emit_deferred() {
        let sig: Signal<()> = Signal::new();
        let count = Rc::new(RefCell::new(0));
        {
            let sig2 = sig.clone();
            let count = Rc::clone(&count);
            sig.connect(move |()| {
                let count = Rc::clone(&count);
                sig2.connect(move |()| *count.borrow_mut() += 1);
            });
        }
        sig.emit(&());
        assert_eq!(*count.borrow(), 0);
        sig.emit(&());
        assert_eq!(*count.borrow(), 1);
    }
}
