/*! The APRS service on top of one AX.25 interface.

Listens on the station's own callsign plus the APRS broadcast
destinations, throws away duplicates (the same frame heard via
different digipeater paths hashes identically, repeater path excluded),
routes directed messages and their ACK/REJ responses, and handles
confirmable outgoing messages with retransmission and back-off.
*/
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::address::{AX25Address, AX25Path};
use crate::aprs::frame::AprsData;
use crate::aprs::message::{AprsMessage, ReplyAck};
use crate::config::AprsConfig;
use crate::frame::AX25Frame;
use crate::interface::{AX25Interface, ReceiverId};
use crate::reactor::{Reactor, TimerHandle};
use crate::signal::Signal;
use crate::{Error, Result};

/// An inbound APRS event: the raw frame, plus its dissection when the
/// payload parsed as APRS.
#[derive(Clone, Debug)]
pub struct AprsEvent {
    /// The frame as heard.
    pub frame: AX25Frame,
    /// The decoded payload, when it decoded.
    pub data: Option<AprsData>,
}

/// State of a confirmable outgoing message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageState {
    /// Created, nothing sent yet.
    Init,
    /// First transmission made.
    Send,
    /// Retransmitted at least once.
    Retry,
    /// The addressee acknowledged it.
    Success,
    /// The addressee rejected it.
    Reject,
    /// Cancelled by the caller.
    Cancel,
    /// Retries exhausted without a response.
    Timeout,
    /// The owning interface went away.
    Fail,
}

impl MessageState {
    /// Whether this state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageState::Success
                | MessageState::Reject
                | MessageState::Cancel
                | MessageState::Timeout
                | MessageState::Fail
        )
    }
}

struct MsgInner {
    reactor: Reactor,
    aprs: Weak<RefCell<AprsInner>>,
    frame: AX25Frame,
    msgid: String,
    timeout: Duration,
    scale: f64,
    retries_left: u32,
    timer: Option<TimerHandle>,
    state: MessageState,
    response: Option<AprsMessage>,
    done: Signal<MessageState>,
}

/// Handle on a confirmable outgoing message. The `done` signal fires
/// exactly once when the handler reaches a terminal state.
#[derive(Clone)]
pub struct MessageHandle {
    inner: Rc<RefCell<MsgInner>>,
}

impl MessageHandle {
    /// The message ID this handler is waiting on.
    #[must_use]
    pub fn msgid(&self) -> String {
        self.inner.borrow().msgid.clone()
    }

    /// Current handler state.
    #[must_use]
    pub fn state(&self) -> MessageState {
        self.inner.borrow().state
    }

    /// The ACK/REJ (or reply-ACK message) that ended the exchange.
    #[must_use]
    pub fn response(&self) -> Option<AprsMessage> {
        self.inner.borrow().response.clone()
    }

    /// Signal fired once with the terminal state.
    #[must_use]
    pub fn done(&self) -> Signal<MessageState> {
        self.inner.borrow().done.clone()
    }

    /// Abandon the message; no further retransmissions.
    pub fn cancel(&self) {
        msg_stop_timer(&self.inner);
        msg_enter_state(&self.inner, MessageState::Cancel);
    }
}

fn msg_stop_timer(inner: &Rc<RefCell<MsgInner>>) {
    if let Some(timer) = inner.borrow_mut().timer.take() {
        timer.cancel();
    }
}

fn msg_send(inner: &Rc<RefCell<MsgInner>>) {
    msg_stop_timer(inner);
    let next = {
        let msg = inner.borrow();
        match msg.state {
            MessageState::Init => MessageState::Send,
            MessageState::Send | MessageState::Retry => {
                if msg.retries_left == 0 {
                    drop(msg);
                    msg_enter_state(inner, MessageState::Timeout);
                    return;
                }
                MessageState::Retry
            }
            state => {
                warn!("attempt to send message {} in state {state:?}", msg.msgid);
                return;
            }
        }
    };
    let aprs = inner.borrow().aprs.upgrade();
    let Some(aprs) = aprs else {
        msg_enter_state(inner, MessageState::Fail);
        return;
    };
    let (frame, ax25) = {
        let mut msg = inner.borrow_mut();
        if next == MessageState::Retry {
            msg.retries_left -= 1;
        }
        let weak = Rc::downgrade(inner);
        let delay = msg.timeout;
        msg.timer = Some(msg.reactor.call_later(delay, move || {
            if let Some(inner) = weak.upgrade() {
                warn!("time-out waiting for response");
                msg_send(&inner);
            }
        }));
        msg.timeout = msg.timeout.mul_f64(msg.scale);
        (msg.frame.clone(), aprs.borrow().ax25.clone())
    };
    ax25.transmit(frame);
    msg_enter_state(inner, next);
}

fn msg_on_response(inner: &Rc<RefCell<MsgInner>>, response: &AprsMessage) {
    msg_stop_timer(inner);
    {
        let mut msg = inner.borrow_mut();
        if !matches!(msg.state, MessageState::Send | MessageState::Retry) {
            // No longer interested.
            return;
        }
        info!("{}: received response", msg.msgid);
        msg.response = Some(response.clone());
    }
    let state = if matches!(response, AprsMessage::Rej { .. }) {
        MessageState::Reject
    } else {
        MessageState::Success
    };
    msg_enter_state(inner, state);
}

fn msg_enter_state(inner: &Rc<RefCell<MsgInner>>, state: MessageState) {
    let (done, reactor, msgid, aprs) = {
        let mut msg = inner.borrow_mut();
        if msg.state.is_terminal() {
            // Terminal outcomes are reported exactly once.
            return;
        }
        debug!("message {} entering state {state:?}", msg.msgid);
        msg.state = state;
        if !state.is_terminal() {
            return;
        }
        (
            msg.done.clone(),
            msg.reactor.clone(),
            msg.msgid.clone(),
            msg.aprs.upgrade(),
        )
    };
    if let Some(aprs) = aprs {
        aprs.borrow_mut().pending.remove(&msgid);
    }
    reactor.call_soon(move || done.emit(&state));
}

struct AprsInner {
    reactor: Reactor,
    ax25: AX25Interface,
    mycall: AX25Address,
    config: AprsConfig,
    aprs_path: AX25Path,
    msgid: u32,
    pending: HashMap<String, MessageHandle>,
    dedup: HashMap<Vec<u8>, Duration>,
    dedup_timer: Option<TimerHandle>,
    receivers: Vec<ReceiverId>,
}

/// The APRS service over one AX.25 interface.
#[derive(Clone)]
pub struct AprsInterface {
    inner: Rc<RefCell<AprsInner>>,
    received: Signal<AprsEvent>,
    addressed: Signal<AprsMessage>,
}

impl AprsInterface {
    /// Create the service and bind it to the station callsign, the
    /// configured broadcast destinations, and any alt-nets.
    pub fn new(
        reactor: &Reactor,
        ax25: AX25Interface,
        mycall: &AX25Address,
        config: AprsConfig,
    ) -> Result<Self> {
        let aprs_path = config
            .aprs_path
            .iter()
            .map(|s| AX25Address::from_str(s).map(|a| a.normalised()))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .collect();
        let iface = Self {
            inner: Rc::new(RefCell::new(AprsInner {
                reactor: reactor.clone(),
                ax25: ax25.clone(),
                mycall: mycall.normalised(),
                config,
                aprs_path,
                msgid: 0,
                pending: HashMap::new(),
                dedup: HashMap::new(),
                dedup_timer: None,
                receivers: Vec::new(),
            })),
            received: Signal::new(),
            addressed: Signal::new(),
        };

        let specs = {
            let inner = iface.inner.borrow();
            let mut specs = vec![(
                inner.mycall.callsign().to_string(),
                Some(inner.mycall.ssid()),
                false,
            )];
            for spec in inner
                .config
                .listen_destinations
                .iter()
                .chain(&inner.config.listen_altnets)
            {
                specs.push((spec.callsign.clone(), spec.ssid, spec.regex));
            }
            specs
        };
        for (callsign, ssid, regex) in specs {
            let weak = Rc::downgrade(&iface.inner);
            let received = iface.received.clone();
            let addressed = iface.addressed.clone();
            let id = ax25.bind(&callsign, ssid, regex, move |frame| {
                if let Some(inner) = weak.upgrade() {
                    on_receive(&inner, &received, &addressed, frame);
                }
            })?;
            iface.inner.borrow_mut().receivers.push(id);
        }
        Ok(iface)
    }

    /// This interface's station address.
    #[must_use]
    pub fn mycall(&self) -> AX25Address {
        self.inner.borrow().mycall.clone()
    }

    /// Signal fired with every non-duplicate APRS frame not directed
    /// to this station.
    #[must_use]
    pub fn received(&self) -> Signal<AprsEvent> {
        self.received.clone()
    }

    /// Signal fired with every message directed to this station.
    #[must_use]
    pub fn addressed(&self) -> Signal<AprsMessage> {
        self.addressed.clone()
    }

    /// Transmit a frame through the underlying interface.
    pub fn transmit(&self, frame: AX25Frame) {
        self.inner.borrow().ax25.transmit(frame);
    }

    /// Number of confirmable messages still awaiting a response.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Send an APRS message.
    ///
    /// One-shot mode fires a single unnumbered frame and returns
    /// `None`. Otherwise the message gets the next message ID and a
    /// retrying handler, returned for the caller to watch. Reply-ACK
    /// participation requires a confirmable message.
    pub fn send_message(
        &self,
        addressee: &AX25Address,
        message: &str,
        path: Option<&AX25Path>,
        oneshot: bool,
        replyack: ReplyAck,
    ) -> Result<Option<MessageHandle>> {
        let (mycall, path) = {
            let inner = self.inner.borrow();
            (
                inner.mycall.clone(),
                path.cloned().unwrap_or_else(|| inner.aprs_path.clone()),
            )
        };
        if oneshot {
            if replyack != ReplyAck::None {
                return Err(Error::InvalidState(
                    "reply-ACK requires a confirmable message".into(),
                ));
            }
            info!("one-shot to {addressee}: {message}");
            let data = AprsMessage::data(addressee.clone(), message, None, ReplyAck::None)?;
            self.transmit(
                AprsData::Message(data).to_frame(addressee.clone(), mycall, path),
            );
            return Ok(None);
        }

        let (msgid, frame, handle) = {
            let mut inner = self.inner.borrow_mut();
            inner.msgid = (inner.msgid + 1) % inner.config.msgid_modulo.max(1);
            let msgid = inner.msgid.to_string();
            let data =
                AprsMessage::data(addressee.clone(), message, Some(&msgid), replyack)?;
            let frame =
                AprsData::Message(data).to_frame(addressee.clone(), mycall, path);
            let timeout = inner.config.retransmit_timeout_base
                + inner
                    .config
                    .retransmit_timeout_rand
                    .mul_f64(rand::rng().random_range(0.0..1.0));
            let handle = MessageHandle {
                inner: Rc::new(RefCell::new(MsgInner {
                    reactor: inner.reactor.clone(),
                    aprs: Rc::downgrade(&self.inner),
                    frame: frame.clone(),
                    msgid: msgid.clone(),
                    timeout,
                    scale: inner.config.retransmit_timeout_scale,
                    retries_left: inner.config.retransmit_count,
                    timer: None,
                    state: MessageState::Init,
                    response: None,
                    done: Signal::new(),
                })),
            };
            inner.pending.insert(msgid.clone(), handle.clone());
            (msgid, frame, handle)
        };
        debug!("sending message {msgid}: {frame}");
        msg_send(&handle.inner);
        Ok(Some(handle))
    }

    /// ACK (or with `ack` false, REJ) an inbound numbered message,
    /// one-shot, back along the path it came by.
    pub fn send_response(&self, frame: &AX25Frame, message: &AprsMessage, ack: bool) {
        let Some(msgid) = message.msgid() else {
            return;
        };
        debug!("responding to message {msgid} with ack={ack}");
        let addressee = frame.header.source.normalised();
        let mycall = self.inner.borrow().mycall.clone();
        let response = if ack {
            AprsMessage::Ack {
                addressee: addressee.clone(),
                msgid: msgid.to_string(),
            }
        } else {
            AprsMessage::Rej {
                addressee: addressee.clone(),
                msgid: msgid.to_string(),
            }
        };
        self.transmit(AprsData::Message(response).to_frame(
            addressee,
            mycall,
            frame.header.repeaters.reply(),
        ));
    }
}

// Digest over destination, source, control and payload. The repeater
// path stays out so the same frame digipeated along different paths
// dedups to one.
fn hash_frame(frame: &AX25Frame) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(frame.header.destination.encode());
    hasher.update(frame.header.source.encode());
    hasher.update(frame.body_bytes());
    hasher.finalize().to_vec()
}

fn test_or_add_frame(inner: &Rc<RefCell<AprsInner>>, frame: &AX25Frame) -> bool {
    let digest = hash_frame(frame);
    let seen = {
        let mut aprs = inner.borrow_mut();
        let now = aprs.reactor.time();
        if aprs.dedup.get(&digest).is_some_and(|&expiry| expiry > now) {
            true
        } else {
            let expiry = now + aprs.config.deduplication_expiry;
            aprs.dedup.insert(digest, expiry);
            false
        }
    };
    if !seen {
        schedule_dedup_cleanup(inner);
    }
    seen
}

fn schedule_dedup_cleanup(inner: &Rc<RefCell<AprsInner>>) {
    let mut aprs = inner.borrow_mut();
    if let Some(timer) = aprs.dedup_timer.take() {
        timer.cancel();
    }
    let Some(&earliest) = aprs.dedup.values().min() else {
        return;
    };
    let delay = earliest.saturating_sub(aprs.reactor.time());
    let weak = Rc::downgrade(inner);
    aprs.dedup_timer = Some(aprs.reactor.call_later(delay, move || {
        if let Some(inner) = weak.upgrade() {
            dedup_cleanup(&inner);
        }
    }));
}

fn dedup_cleanup(inner: &Rc<RefCell<AprsInner>>) {
    {
        let mut aprs = inner.borrow_mut();
        aprs.dedup_timer = None;
        let now = aprs.reactor.time();
        aprs.dedup.retain(|_, &mut expiry| expiry > now);
    }
    schedule_dedup_cleanup(inner);
}

fn on_receive(
    inner: &Rc<RefCell<AprsInner>>,
    received: &Signal<AprsEvent>,
    addressed: &Signal<AprsMessage>,
    frame: &AX25Frame,
) {
    if test_or_add_frame(inner, frame) {
        debug!("ignoring duplicate frame: {frame}");
        return;
    }
    let data = AprsData::decode(frame);
    if let Some(AprsData::Message(message)) = &data {
        let mycall = inner.borrow().mycall.clone();
        if *message.addressee() == mycall {
            match message {
                AprsMessage::Ack { msgid, .. } | AprsMessage::Rej { msgid, .. } => {
                    let handler = inner.borrow().pending.get(msgid).cloned();
                    if let Some(handler) = handler {
                        msg_on_response(&handler.inner, message);
                        return;
                    }
                    debug!("response to unknown message {msgid}");
                }
                AprsMessage::Data { replyack, .. } => {
                    if let ReplyAck::Replying(ackid) = replyack {
                        // The reply carries an embedded acknowledgement.
                        let handler = inner.borrow().pending.get(ackid).cloned();
                        if let Some(handler) = handler {
                            msg_on_response(&handler.inner, message);
                        }
                    }
                    addressed.emit(message);
                    return;
                }
            }
        }
    }
    received.emit(&AprsEvent {
        frame: frame.clone(),
        data,
    });
}
