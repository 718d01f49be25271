/*! The logical AX.25 interface: receive routing and clear-to-send
transmit scheduling over one KISS port.

Receive: every inbound frame is decoded and published, both on the
interface-wide [`AX25Interface::received`] signal and to any receivers
bound to the frame's destination — a literal callsign+SSID, or a
regular expression over the callsign.

Transmit: outgoing frames queue in FIFO order and leave only when the
channel has been quiet long enough. The clear-to-send expiry is pushed
forward (never backward) by a random amount every time traffic is
heard, which is the whole of the CSMA story on a half-duplex channel
whose modem handles the actual carrier sense.
*/
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use log::{debug, error, info};
use rand::Rng;
use regex::Regex;

use crate::frame::AX25Frame;
use crate::kiss::KissPort;
use crate::reactor::{Reactor, TimerHandle};
use crate::signal::Signal;
use crate::{Error, Result};

/// Default clear-to-send delay.
pub const DEFAULT_CTS_DELAY: Duration = Duration::from_millis(10);
/// Default clear-to-send randomisation window.
pub const DEFAULT_CTS_RAND: Duration = Duration::from_millis(10);

/// Identifies a frame sitting in the transmit queue, for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxTicket(u64);

/// Identifies a bound receiver, for unbinding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiverId(u64);

type ReceiverFn = Rc<RefCell<dyn FnMut(&AX25Frame)>>;

struct Receiver {
    id: ReceiverId,
    func: ReceiverFn,
}

// Keyed on the SSID filter; `None` matches every SSID.
type SsidReceivers = HashMap<Option<u8>, Vec<Receiver>>;

struct RegexBinding {
    regex: Regex,
    receivers: SsidReceivers,
}

struct PendingTx {
    ticket: TxTicket,
    frame: AX25Frame,
    callback: Option<Box<dyn FnOnce(&AX25Frame)>>,
}

struct IfaceInner {
    reactor: Reactor,
    port: KissPort,
    cts_delay: Duration,
    cts_rand: Duration,
    cts_expiry: Duration,
    tx_queue: VecDeque<PendingTx>,
    tx_timer: Option<TimerHandle>,
    next_id: u64,
    receivers_str: HashMap<String, SsidReceivers>,
    receivers_re: HashMap<String, RegexBinding>,
}

/// A logical AX.25 interface over one KISS port.
#[derive(Clone)]
pub struct AX25Interface {
    inner: Rc<RefCell<IfaceInner>>,
    received: Signal<AX25Frame>,
}

impl AX25Interface {
    /// Create an interface over `port` with default CTS timing.
    pub fn new(reactor: &Reactor, port: KissPort) -> Self {
        Self::with_cts(reactor, port, DEFAULT_CTS_DELAY, DEFAULT_CTS_RAND)
    }

    /// Create an interface with explicit CTS timing.
    pub fn with_cts(
        reactor: &Reactor,
        port: KissPort,
        cts_delay: Duration,
        cts_rand: Duration,
    ) -> Self {
        let cts_expiry = reactor.time() + cts_delay + jitter(cts_rand);
        let iface = Self {
            inner: Rc::new(RefCell::new(IfaceInner {
                reactor: reactor.clone(),
                port: port.clone(),
                cts_delay,
                cts_rand,
                cts_expiry,
                tx_queue: VecDeque::new(),
                tx_timer: None,
                next_id: 0,
                receivers_str: HashMap::new(),
                receivers_re: HashMap::new(),
            })),
            received: Signal::new(),
        };
        let weak = Rc::downgrade(&iface.inner);
        let received = iface.received.clone();
        port.received().connect(move |bytes: &Vec<u8>| {
            if let Some(inner) = weak.upgrade() {
                on_receive(&inner, &received, bytes);
            }
        });
        iface
    }

    /// Signal fired with every decoded inbound frame, regardless of
    /// destination.
    #[must_use]
    pub fn received(&self) -> Signal<AX25Frame> {
        self.received.clone()
    }

    /// Bind a receiver to a destination. With `regex` set, `callsign`
    /// is a regular expression matched against destination callsigns;
    /// otherwise it must match literally. An `ssid` of `None` matches
    /// every SSID.
    pub fn bind(
        &self,
        callsign: &str,
        ssid: Option<u8>,
        regex: bool,
        func: impl FnMut(&AX25Frame) + 'static,
    ) -> Result<ReceiverId> {
        let mut inner = self.inner.borrow_mut();
        let id = ReceiverId(inner.next_id);
        inner.next_id += 1;
        let receiver = Receiver {
            id,
            func: Rc::new(RefCell::new(func)),
        };
        if regex {
            let compiled = Regex::new(callsign)
                .map_err(|e| Error::InvalidAddress(format!("bad callsign pattern: {e}")))?;
            inner
                .receivers_re
                .entry(callsign.to_string())
                .or_insert_with(|| RegexBinding {
                    regex: compiled,
                    receivers: HashMap::new(),
                })
                .receivers
                .entry(ssid)
                .or_default()
                .push(receiver);
        } else {
            inner
                .receivers_str
                .entry(callsign.to_uppercase())
                .or_default()
                .entry(ssid)
                .or_default()
                .push(receiver);
        }
        Ok(id)
    }

    /// Remove a bound receiver.
    pub fn unbind(&self, id: ReceiverId) {
        let mut inner = self.inner.borrow_mut();
        for by_ssid in inner.receivers_str.values_mut() {
            for receivers in by_ssid.values_mut() {
                receivers.retain(|r| r.id != id);
            }
            by_ssid.retain(|_, receivers| !receivers.is_empty());
        }
        inner.receivers_str.retain(|_, by_ssid| !by_ssid.is_empty());
        for binding in inner.receivers_re.values_mut() {
            for receivers in binding.receivers.values_mut() {
                receivers.retain(|r| r.id != id);
            }
            binding.receivers.retain(|_, receivers| !receivers.is_empty());
        }
        inner
            .receivers_re
            .retain(|_, binding| !binding.receivers.is_empty());
    }

    /// Queue a frame for transmission at the next clear-to-send.
    pub fn transmit(&self, frame: AX25Frame) -> TxTicket {
        self.enqueue(frame, None)
    }

    /// Queue a frame and get `callback` invoked once it has been
    /// handed to the port.
    pub fn transmit_with_callback(
        &self,
        frame: AX25Frame,
        callback: impl FnOnce(&AX25Frame) + 'static,
    ) -> TxTicket {
        self.enqueue(frame, Some(Box::new(callback)))
    }

    fn enqueue(&self, frame: AX25Frame, callback: Option<Box<dyn FnOnce(&AX25Frame)>>) -> TxTicket {
        let mut inner = self.inner.borrow_mut();
        debug!("queueing for transmission: {frame}");
        let ticket = TxTicket(inner.next_id);
        inner.next_id += 1;
        inner.tx_queue.push_back(PendingTx {
            ticket,
            frame,
            callback,
        });
        if inner.tx_timer.is_none() {
            schedule_tx(&self.inner, &mut inner);
        }
        ticket
    }

    /// Remove a queued frame. Does nothing if the frame already left.
    pub fn cancel_transmit(&self, ticket: TxTicket) {
        let mut inner = self.inner.borrow_mut();
        inner.tx_queue.retain(|tx| tx.ticket != ticket);
    }

    /// Number of frames waiting to leave.
    #[must_use]
    pub fn pending_transmissions(&self) -> usize {
        self.inner.borrow().tx_queue.len()
    }
}

fn jitter(cts_rand: Duration) -> Duration {
    cts_rand.mul_f64(rand::rng().random_range(0.0..1.0))
}

fn on_receive(inner: &Rc<RefCell<IfaceInner>>, received: &Signal<AX25Frame>, bytes: &[u8]) {
    reset_cts(inner);
    let frame = match AX25Frame::decode(bytes, None) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("dropping undecodable frame: {e}");
            return;
        }
    };
    debug!("handling incoming frame {frame}");
    received.emit(&frame);

    let callsign = frame.header.destination.callsign().to_string();
    let ssid = frame.header.destination.ssid();
    let mut funcs: Vec<ReceiverFn> = Vec::new();
    {
        let inner = inner.borrow();
        if let Some(by_ssid) = inner.receivers_str.get(&callsign) {
            for key in [None, Some(ssid)] {
                if let Some(receivers) = by_ssid.get(&key) {
                    funcs.extend(receivers.iter().map(|r| Rc::clone(&r.func)));
                }
            }
        }
        for binding in inner.receivers_re.values() {
            if !binding.regex.is_match(&callsign) {
                continue;
            }
            for key in [None, Some(ssid)] {
                if let Some(receivers) = binding.receivers.get(&key) {
                    funcs.extend(receivers.iter().map(|r| Rc::clone(&r.func)));
                }
            }
        }
    }
    debug!("dispatching frame to {} receivers", funcs.len());
    for func in funcs {
        if catch_unwind(AssertUnwindSafe(|| (func.borrow_mut())(&frame))).is_err() {
            error!("receiver panicked handling {frame}; continuing");
        }
    }
}

// Push the clear-to-send expiry forward. Never backward: a burst of
// receptions must keep extending the quiet period we wait out.
fn reset_cts(inner: &Rc<RefCell<IfaceInner>>) {
    let mut iface = inner.borrow_mut();
    let now = iface.reactor.time();
    let mut expiry = now + iface.cts_delay + jitter(iface.cts_rand);
    if iface.cts_rand.is_zero() {
        expiry = expiry.max(iface.cts_expiry);
    } else {
        while expiry < iface.cts_expiry {
            expiry += jitter(iface.cts_rand);
        }
    }
    iface.cts_expiry = expiry;
    debug!("clear-to-send expiry at {expiry:?}");
    if iface.tx_timer.is_some() {
        schedule_tx(inner, &mut iface);
    }
}

fn schedule_tx(rc: &Rc<RefCell<IfaceInner>>, iface: &mut IfaceInner) {
    if let Some(timer) = iface.tx_timer.take() {
        timer.cancel();
    }
    let delay = iface.cts_expiry.saturating_sub(iface.reactor.time());
    debug!("scheduling next transmission in {delay:?}");
    let weak = Rc::downgrade(rc);
    iface.tx_timer = Some(iface.reactor.call_later(delay, move || {
        if let Some(inner) = weak.upgrade() {
            tx_next(&inner);
        }
    }));
}

fn tx_next(inner: &Rc<RefCell<IfaceInner>>) {
    let entry = {
        let mut iface = inner.borrow_mut();
        iface.tx_timer = None;
        iface.tx_queue.pop_front()
    };
    let Some(PendingTx {
        frame, callback, ..
    }) = entry
    else {
        debug!("no traffic to transmit");
        return;
    };

    if let Some(deadline) = frame.deadline {
        if deadline < SystemTime::now() {
            info!("dropping expired frame: {frame}");
            let mut iface = inner.borrow_mut();
            if !iface.tx_queue.is_empty() {
                schedule_tx(inner, &mut iface);
            }
            return;
        }
    }

    debug!("transmitting {frame}");
    let (port, reactor) = {
        let iface = inner.borrow();
        (iface.port.clone(), iface.reactor.clone())
    };
    port.send(&frame.encode());
    if let Some(callback) = callback {
        reactor.call_soon(move || callback(&frame));
    }

    reset_cts(inner);
    let mut iface = inner.borrow_mut();
    if !iface.tx_queue.is_empty() {
        schedule_tx(inner, &mut iface);
    }
}
