/*! Single-threaded cooperative event loop.

Everything in this crate is driven from one [`Reactor`]: inbound bytes
from transports, timer expiries, and deferred callbacks all run on the
thread that calls [`Reactor::run`]. An event is processed to completion
— including any chain of callbacks it triggers — before the next one is
dispatched, so protocol state never needs locking.

Transports deliver their bytes from small reader threads through the
channel returned by [`Reactor::io_sender`]; that channel is the only
thread boundary in the crate.

Time is a monotonic [`Duration`] since the reactor was created. Tests
drive it directly with [`Reactor::advance`] instead of sleeping, which
makes timer behaviour deterministic.
*/
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use log::{error, trace};

use crate::{Error, Result};

/// A deferred callback.
pub type Callback = Box<dyn FnOnce()>;

/// Identifies an I/O source registered with the reactor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

#[cfg(test)]
impl SourceId {
    pub(crate) fn test_id(id: u64) -> Self {
        Self(id)
    }
}

/// What happened on an I/O source.
#[derive(Debug)]
pub enum IoEvent {
    /// Bytes arrived.
    Data(Vec<u8>),
    /// The pipe reached end of file.
    Closed,
    /// The pipe failed.
    Error(std::io::Error),
}

/// A tagged I/O event, as sent by transport reader threads.
#[derive(Debug)]
pub struct SourceEvent {
    /// Which source this came from.
    pub source: SourceId,
    /// What happened.
    pub event: IoEvent,
}

type IoHandler = Rc<RefCell<dyn FnMut(IoEvent)>>;

struct Inner {
    epoch: Instant,
    now: Duration,
    next_timer: u64,
    next_source: u64,
    deadlines: BinaryHeap<Reverse<(Duration, u64)>>,
    timers: HashMap<u64, Callback>,
    soon: VecDeque<Callback>,
    io_handlers: HashMap<SourceId, IoHandler>,
    io_tx: mpsc::Sender<SourceEvent>,
    io_rx: Option<mpsc::Receiver<SourceEvent>>,
    running: bool,
}

/// Handle on the event loop. Cloning is cheap and all clones refer to
/// the same loop.
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<RefCell<Inner>>,
}

/// A cancellable handle on a one-shot timer.
///
/// Dropping the handle does *not* cancel the timer; only
/// [`TimerHandle::cancel`] does. Cancelling after the timer fired is a
/// no-op.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    inner: Weak<RefCell<Inner>>,
}

impl TimerHandle {
    /// Cancel the timer if it has not fired yet.
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().timers.remove(&self.id);
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    /// Create an event loop. Its clock starts at zero.
    pub fn new() -> Self {
        let (io_tx, io_rx) = mpsc::channel();
        Self {
            inner: Rc::new(RefCell::new(Inner {
                epoch: Instant::now(),
                now: Duration::ZERO,
                next_timer: 0,
                next_source: 0,
                deadlines: BinaryHeap::new(),
                timers: HashMap::new(),
                soon: VecDeque::new(),
                io_handlers: HashMap::new(),
                io_tx,
                io_rx: Some(io_rx),
                running: false,
            })),
        }
    }

    /// Monotonic time since the reactor was created.
    #[must_use]
    pub fn time(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Run `callback` once `delay` has elapsed.
    pub fn call_later(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_timer;
        inner.next_timer += 1;
        let deadline = inner.now + delay;
        inner.deadlines.push(Reverse((deadline, id)));
        inner.timers.insert(id, Box::new(callback));
        trace!("timer {id} armed for {deadline:?}");
        TimerHandle {
            id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Run `callback` on the next pass through the loop, after the
    /// current event finishes.
    pub fn call_soon(&self, callback: impl FnOnce() + 'static) {
        self.inner.borrow_mut().soon.push_back(Box::new(callback));
    }

    /// The sender half used by transport reader threads.
    #[must_use]
    pub fn io_sender(&self) -> mpsc::Sender<SourceEvent> {
        self.inner.borrow().io_tx.clone()
    }

    /// Register a handler for events from a new I/O source, returning
    /// the id the source's reader thread must tag its events with.
    pub fn register_source(&self, handler: impl FnMut(IoEvent) + 'static) -> SourceId {
        let mut inner = self.inner.borrow_mut();
        let id = SourceId(inner.next_source);
        inner.next_source += 1;
        inner.io_handlers.insert(id, Rc::new(RefCell::new(handler)));
        id
    }

    /// Remove an I/O source. Events still in flight for it are dropped.
    pub fn unregister_source(&self, id: SourceId) {
        self.inner.borrow_mut().io_handlers.remove(&id);
    }

    /// Ask a running [`Reactor::run`] to return after the current
    /// event.
    pub fn stop(&self) {
        self.inner.borrow_mut().running = false;
    }

    /// Drain the deferred-callback queue, including callbacks queued
    /// by the callbacks being drained.
    pub fn run_pending(&self) {
        loop {
            let callback = self.inner.borrow_mut().soon.pop_front();
            match callback {
                Some(callback) => callback(),
                None => return,
            }
        }
    }

    // Pop the callback of the earliest timer due at or before `limit`,
    // moving the clock to its deadline.
    fn pop_due(&self, limit: Duration) -> Option<Callback> {
        let mut inner = self.inner.borrow_mut();
        while let Some(Reverse((deadline, id))) = inner.deadlines.peek().copied() {
            if deadline > limit {
                return None;
            }
            inner.deadlines.pop();
            if let Some(callback) = inner.timers.remove(&id) {
                inner.now = inner.now.max(deadline);
                trace!("timer {id} fired at {deadline:?}");
                return Some(callback);
            }
            // Cancelled; its heap entry was left behind.
        }
        None
    }

    fn next_deadline(&self) -> Option<Duration> {
        let mut inner = self.inner.borrow_mut();
        while let Some(Reverse((deadline, id))) = inner.deadlines.peek().copied() {
            if inner.timers.contains_key(&id) {
                return Some(deadline);
            }
            inner.deadlines.pop();
        }
        None
    }

    /// Advance the virtual clock by `duration`, firing every timer and
    /// deferred callback that falls due. This is how tests exercise
    /// timer-driven behaviour without sleeping.
    pub fn advance(&self, duration: Duration) {
        let target = self.inner.borrow().now + duration;
        self.run_pending();
        while let Some(callback) = self.pop_due(target) {
            callback();
            self.run_pending();
        }
        self.inner.borrow_mut().now = target;
    }

    fn dispatch(&self, event: SourceEvent) {
        let handler = self.inner.borrow().io_handlers.get(&event.source).cloned();
        match handler {
            Some(handler) => (handler.borrow_mut())(event.event),
            None => trace!("dropping event for unregistered source {:?}", event.source),
        }
    }

    /// Dispatch any I/O events already queued, without blocking. This
    /// is what embedders (and tests) call instead of [`Reactor::run`]
    /// when they own the outer loop.
    pub fn poll_io(&self) {
        loop {
            let event = {
                let inner = self.inner.borrow();
                match &inner.io_rx {
                    Some(io_rx) => match io_rx.try_recv() {
                        Ok(event) => event,
                        Err(_) => return,
                    },
                    None => return,
                }
            };
            self.dispatch(event);
            self.run_pending();
        }
    }

    /// Run the loop against wall-clock time until [`Reactor::stop`] is
    /// called. Fails if the loop is already running (the receiver half
    /// of the I/O channel is single-consumer).
    pub fn run(&self) -> Result<()> {
        let io_rx = {
            let mut inner = self.inner.borrow_mut();
            inner.running = true;
            inner.io_rx.take().ok_or_else(|| {
                Error::InvalidState("reactor is already running".into())
            })?
        };
        while self.inner.borrow().running {
            self.run_pending();
            let now = {
                let mut inner = self.inner.borrow_mut();
                inner.now = inner.epoch.elapsed();
                inner.now
            };
            if let Some(callback) = self.pop_due(now) {
                callback();
                continue;
            }
            let wait = self
                .next_deadline()
                .map_or(Duration::from_millis(100), |deadline| {
                    deadline.saturating_sub(now)
                });
            match io_rx.recv_timeout(wait) {
                Ok(event) => self.dispatch(event),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    error!("all IO senders disconnected; stopping reactor");
                    break;
                }
            }
        }
        self.inner.borrow_mut().io_rx = Some(io_rx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_fire_in_deadline_order() {
        let reactor = Reactor::new();
        let fired = Rc::new(RefCell::new(Vec::new()));
        for (tag, ms) in [("b", 20u64), ("a", 10), ("c", 30)] {
            let fired = Rc::clone(&fired);
            reactor.call_later(Duration::from_millis(ms), move || {
                fired.borrow_mut().push(tag);
            });
        }
        reactor.advance(Duration::from_millis(25));
        assert_eq!(*fired.borrow(), vec!["a", "b"]);
        reactor.advance(Duration::from_millis(25));
        assert_eq!(*fired.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let reactor = Reactor::new();
        let fired = Rc::new(RefCell::new(false));
        let handle = {
            let fired = Rc::clone(&fired);
            reactor.call_later(Duration::from_millis(10), move || {
                *fired.borrow_mut() = true;
            })
        };
        handle.cancel();
        // Cancelling twice is harmless.
        handle.cancel();
        reactor.advance(Duration::from_millis(20));
        assert!(!*fired.borrow());
    }

    #[test]
    fn clock_advances_to_deadline_during_callback() {
        let reactor = Reactor::new();
        let seen = Rc::new(RefCell::new(Duration::ZERO));
        {
            let reactor2 = reactor.clone();
            let seen = Rc::clone(&seen);
            reactor.call_later(Duration::from_millis(10), move || {
                *seen.borrow_mut() = reactor2.time();
            });
        }
        reactor.advance(Duration::from_millis(50));
        assert_eq!(*seen.borrow(), Duration::from_millis(10));
        assert_eq!(reactor.time(), Duration::from_millis(50));
    }

    #[test]
    fn timer_scheduled_by_timer_fires_in_same_advance() {
        let reactor = Reactor::new();
        let fired = Rc::new(RefCell::new(false));
        {
            let reactor2 = reactor.clone();
            let fired = Rc::clone(&fired);
            reactor.call_later(Duration::from_millis(10), move || {
                let fired = Rc::clone(&fired);
                reactor2.call_later(Duration::from_millis(10), move || {
                    *fired.borrow_mut() = true;
                });
            });
        }
        reactor.advance(Duration::from_millis(30));
        assert!(*fired.borrow());
    }

    #[test]
    fn call_soon_runs_fifo() {
        let reactor = Reactor::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in [1, 2, 3] {
            let order = Rc::clone(&order);
            reactor.call_soon(move || order.borrow_mut().push(tag));
        }
        reactor.run_pending();
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn io_events_reach_their_handler() {
        let reactor = Reactor::new();
        let got = Rc::new(RefCell::new(Vec::new()));
        let source = {
            let got = Rc::clone(&got);
            reactor.register_source(move |event| {
                if let IoEvent::Data(bytes) = event {
                    got.borrow_mut().extend(bytes);
                }
            })
        };
        let tx = reactor.io_sender();
        tx.send(SourceEvent {
            source,
            event: IoEvent::Data(vec![1, 2, 3]),
        })
        .unwrap();
        // Deliver by hand: tests don't spin the blocking loop.
        let event = {
            let mut inner = reactor.inner.borrow_mut();
            inner.io_rx.as_mut().unwrap().try_recv().unwrap()
        };
        reactor.dispatch(event);
        assert_eq!(*got.borrow(), vec![1, 2, 3]);
    }
}
