/*! Per-remote-station connection state machine.

An [`AX25Peer`] is this station's view of one remote station: the
connection life cycle (SABM/SABME, UA, DISC, DM, FRMR), XID parameter
negotiation, I-frame windowing with acknowledgement and retransmission,
and reject recovery. Peers are created lazily by
[`crate::station::AX25Station`] — on first receive or on an outgoing
connect — and remove themselves after an idle timeout.

State variable names follow AX.25 2.2 §4.2.4: `V(S)` is the send state,
`V(R)` the receive state, `V(A)` the acknowledge state; an I frame
carries its sequence number `N(S)` and piggybacks the acknowledgement
`N(R)`.
*/
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::address::{AX25Address, AX25Path};
use crate::config::{AX25Version, StationConfig};
use crate::frame::{
    AX25Frame, AX25FrameBody, AX25FrameHeader, InformationFrame, SupervisoryCode,
    SupervisoryFrame, UnnumberedFrame, XID_FI_AX25, XID_GI_PARAMETER_NEGOTIATION,
};
use crate::interface::AX25Interface;
use crate::reactor::{Reactor, TimerHandle};
use crate::signal::Signal;
use crate::xid::{XidCapabilities, XidNegotiated, XidParameter};

/// Connection state of a peer (AX.25 2.2 §4.2.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AX25PeerState {
    /// No connection established.
    Disconnected,
    /// XID sent, awaiting the peer's parameters.
    Negotiating,
    /// SABM(E) sent, awaiting UA.
    Connecting,
    /// Information transfer state.
    Connected,
    /// DISC sent, awaiting UA.
    Disconnecting,
    /// Frame-reject condition; cleared only by SABM, DISC or DM.
    FrameReject,
}

/// Terminal outcome of a [`AX25Peer::connect`] or
/// [`AX25Peer::disconnect`] request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The connection reached the information transfer state.
    Established,
    /// The link is disconnected.
    Disconnected,
    /// The remote station refused (DM).
    Refused,
    /// Retries were exhausted without a response.
    Timeout,
}

/// Handle on an in-flight connect/disconnect request. The `done`
/// signal fires exactly once with the terminal outcome.
#[derive(Clone)]
pub struct RequestHandle {
    done: Signal<RequestOutcome>,
}

impl RequestHandle {
    fn new() -> Self {
        Self {
            done: Signal::new(),
        }
    }

    /// Signal fired once with the request's terminal outcome.
    #[must_use]
    pub fn done(&self) -> Signal<RequestOutcome> {
        self.done.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestKind {
    Negotiate,
    Connect,
    Disconnect,
}

struct CurrentRequest {
    kind: RequestKind,
    retries_left: u32,
    timer: Option<TimerHandle>,
    frame: AX25Frame,
    handle: RequestHandle,
}

/// Everything a peer needs from its owning station, passed at
/// construction so the peer holds no owning pointer back (the
/// ownership cycle is broken by `on_drop`, which reaches the station
/// through a weak reference).
pub(crate) struct PeerParams {
    pub reactor: Reactor,
    pub interface: AX25Interface,
    pub our_address: AX25Address,
    pub remote: AX25Address,
    pub config: StationConfig,
    pub repeaters: AX25Path,
    pub locked_path: bool,
    pub connection_request: Signal<AX25Peer>,
    pub on_drop: Rc<dyn Fn(&AX25Address)>,
}

type PathKey = Vec<AX25Address>;

struct PeerInner {
    reactor: Reactor,
    interface: AX25Interface,
    our_address: AX25Address,
    remote: AX25Address,
    config: StationConfig,
    connection_request: Signal<AX25Peer>,
    on_drop: Rc<dyn Fn(&AX25Address)>,

    state: AX25PeerState,
    peer_protocol: Option<AX25Version>,
    negotiated: Option<XidNegotiated>,
    modulo128: bool,
    max_outstanding: u8,
    vs: u8,
    vr: u8,
    va: u8,
    local_busy: bool,
    peer_busy: bool,
    last_rnr_sent: Option<Duration>,

    // Outgoing I frames awaiting acknowledgement, keyed by N(S).
    pending_iframes: HashMap<u8, (u8, Vec<u8>)>,
    // Payloads waiting for a window slot.
    pending_data: VecDeque<(u8, Vec<u8>)>,

    configured_path: AX25Path,
    locked_path: bool,
    reply_path: Option<AX25Path>,
    rx_path_count: HashMap<PathKey, u32>,
    tx_path_score: HashMap<PathKey, i32>,

    idle_timer: Option<TimerHandle>,
    rr_timer: Option<TimerHandle>,
    busy_poll_timer: Option<TimerHandle>,
    ack_timer: Option<TimerHandle>,
    ack_retries: u32,
    request: Option<CurrentRequest>,
    frmr_frame: Option<AX25Frame>,

    received_information: Signal<InformationFrame>,
    state_changed: Signal<AX25PeerState>,
    test_response: Signal<Vec<u8>>,
}

/// This station's view of one remote station.
#[derive(Clone)]
pub struct AX25Peer {
    inner: Rc<RefCell<PeerInner>>,
}

impl AX25Peer {
    pub(crate) fn new(params: PeerParams) -> Self {
        let peer = Self {
            inner: Rc::new(RefCell::new(PeerInner {
                reactor: params.reactor,
                interface: params.interface,
                our_address: params.our_address,
                remote: params.remote,
                config: params.config,
                connection_request: params.connection_request,
                on_drop: params.on_drop,
                state: AX25PeerState::Disconnected,
                peer_protocol: None,
                negotiated: None,
                modulo128: false,
                max_outstanding: 0,
                vs: 0,
                vr: 0,
                va: 0,
                local_busy: false,
                peer_busy: false,
                last_rnr_sent: None,
                pending_iframes: HashMap::new(),
                pending_data: VecDeque::new(),
                configured_path: params.repeaters,
                locked_path: params.locked_path,
                reply_path: None,
                rx_path_count: HashMap::new(),
                tx_path_score: HashMap::new(),
                idle_timer: None,
                rr_timer: None,
                busy_poll_timer: None,
                ack_timer: None,
                ack_retries: 0,
                request: None,
                frmr_frame: None,
                received_information: Signal::new(),
                state_changed: Signal::new(),
                test_response: Signal::new(),
            })),
        };
        reset_idle_timeout(&peer.inner);
        peer
    }

    /// The remote station's (normalised) address.
    #[must_use]
    pub fn address(&self) -> AX25Address {
        self.inner.borrow().remote.clone()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> AX25PeerState {
        self.inner.borrow().state
    }

    /// Whether the connection runs modulo 128.
    #[must_use]
    pub fn modulo128(&self) -> bool {
        self.inner.borrow().modulo128
    }

    /// Signal fired with every accepted inbound I frame.
    #[must_use]
    pub fn received_information(&self) -> Signal<InformationFrame> {
        self.inner.borrow().received_information.clone()
    }

    /// Signal fired on every connection state change.
    #[must_use]
    pub fn state_changed(&self) -> Signal<AX25PeerState> {
        self.inner.borrow().state_changed.clone()
    }

    /// Signal fired with the payload of each TEST response received.
    #[must_use]
    pub fn test_response(&self) -> Signal<Vec<u8>> {
        self.inner.borrow().test_response.clone()
    }

    /// The digipeater path used when transmitting to this peer.
    #[must_use]
    pub fn reply_path(&self) -> AX25Path {
        current_reply_path(&self.inner)
    }

    /// Adjust the score of a transmit path. With `relative`, `weight`
    /// is added to the current score; otherwise it replaces it.
    pub fn weight_path(&self, path: &AX25Path, weight: i32, relative: bool) {
        let key = path_key(path);
        let mut peer = self.inner.borrow_mut();
        let score = peer.tx_path_score.entry(key).or_insert(0);
        *score = if relative { *score + weight } else { weight };
    }

    /// Initiate a connection. In AX.25 2.2 mode this starts with an
    /// XID exchange unless parameters were already negotiated. The
    /// returned handle reports the terminal outcome exactly once.
    pub fn connect(&self) -> RequestHandle {
        let handle = RequestHandle::new();
        {
            let peer = self.inner.borrow();
            if peer.state != AX25PeerState::Disconnected || peer.request.is_some() {
                let done = handle.done();
                peer.reactor
                    .call_soon(move || done.emit(&RequestOutcome::Refused));
                return handle;
            }
        }
        let negotiate = {
            let peer = self.inner.borrow();
            peer.config.protocol == AX25Version::Ax25_22
                && peer.negotiated.is_none()
                && peer.peer_protocol != Some(AX25Version::Ax25_20)
        };
        if negotiate {
            start_negotiation(&self.inner, handle.clone());
        } else {
            start_connect(&self.inner, handle.clone());
        }
        handle
    }

    /// Tear the connection down with DISC, awaiting UA.
    pub fn disconnect(&self) -> RequestHandle {
        let handle = RequestHandle::new();
        {
            let peer = self.inner.borrow();
            if peer.state != AX25PeerState::Connected {
                let done = handle.done();
                peer.reactor
                    .call_soon(move || done.emit(&RequestOutcome::Disconnected));
                return handle;
            }
        }
        start_disconnect(&self.inner, handle.clone());
        handle
    }

    /// Queue payload for sequenced delivery. The payload is split into
    /// I fields no larger than the negotiated maximum and sent as the
    /// window allows. Data queued while not connected waits for the
    /// next connection.
    pub fn send(&self, pid: u8, payload: &[u8]) {
        {
            let mut peer = self.inner.borrow_mut();
            let max_ifield = peer
                .negotiated
                .as_ref()
                .map_or(peer.config.max_ifield, |n| n.max_ifield)
                .max(1) as usize;
            for chunk in payload.chunks(max_ifield) {
                peer.pending_data.push_back((pid, chunk.to_vec()));
            }
        }
        send_pending(&self.inner);
    }

    /// Handle a frame the station routed to this peer.
    pub(crate) fn on_receive(&self, frame: &AX25Frame) {
        on_receive(&self.inner, frame);
    }

    #[cfg(test)]
    pub(crate) fn debug_window(&self) -> (u8, u8, u8, Vec<u8>) {
        let peer = self.inner.borrow();
        let mut keys: Vec<u8> = peer.pending_iframes.keys().copied().collect();
        keys.sort_unstable();
        (peer.va, peer.vs, peer.vr, keys)
    }
}

fn handle_of(inner: &Rc<RefCell<PeerInner>>) -> AX25Peer {
    AX25Peer {
        inner: Rc::clone(inner),
    }
}

fn path_key(path: &AX25Path) -> PathKey {
    path.iter().map(AX25Address::normalised).collect()
}

fn modulo(peer: &PeerInner) -> u8 {
    if peer.modulo128 { 128 } else { 8 }
}

fn outstanding(peer: &PeerInner) -> u8 {
    let m = u16::from(modulo(peer));
    ((u16::from(peer.vs) + m - u16::from(peer.va)) % m) as u8
}

fn t1(peer: &PeerInner) -> Duration {
    peer.negotiated
        .as_ref()
        .map_or(peer.config.ack_timeout, |n| n.ack_timeout)
}

fn max_retries(peer: &PeerInner) -> u32 {
    peer.negotiated
        .as_ref()
        .map_or(peer.config.max_retries, |n| n.retries)
}

fn current_reply_path(inner: &Rc<RefCell<PeerInner>>) -> AX25Path {
    let mut peer = inner.borrow_mut();
    if let Some(path) = &peer.reply_path {
        return path.clone();
    }
    if peer.locked_path {
        return peer.configured_path.clone();
    }
    // Best transmit score first, then the most-seen receive path.
    let best = peer
        .tx_path_score
        .iter()
        .max_by_key(|(_, score)| **score)
        .map(|(path, _)| path.clone())
        .or_else(|| {
            peer.rx_path_count
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(path, _)| path.clone())
        })
        .unwrap_or_default();
    let path = AX25Path::new(best);
    // Keep using this path until given a reason to change.
    peer.reply_path = Some(path.clone());
    path
}

fn set_state(inner: &Rc<RefCell<PeerInner>>, state: AX25PeerState) {
    let (signal, reactor, changed) = {
        let mut peer = inner.borrow_mut();
        let changed = peer.state != state;
        if changed {
            info!(
                "{}: connection state change: {:?} -> {state:?}",
                peer.remote, peer.state
            );
            peer.state = state;
        }
        (peer.state_changed.clone(), peer.reactor.clone(), changed)
    };
    if changed {
        reactor.call_soon(move || signal.emit(&state));
    }
}

fn reset_idle_timeout(inner: &Rc<RefCell<PeerInner>>) {
    let mut peer = inner.borrow_mut();
    if let Some(timer) = peer.idle_timer.take() {
        timer.cancel();
    }
    let weak = Rc::downgrade(inner);
    let idle = peer.config.idle_timeout;
    peer.idle_timer = Some(peer.reactor.call_later(idle, move || {
        if let Some(inner) = weak.upgrade() {
            cleanup(&inner);
        }
    }));
}

// Idle expiry: shut the link down if it was up, then remove ourselves
// from the station.
fn cleanup(inner: &Rc<RefCell<PeerInner>>) {
    let state = inner.borrow().state;
    if state != AX25PeerState::Disconnected {
        warn!("disconnecting peer due to inactivity");
        send_dm(inner);
    }
    let mut peer = inner.borrow_mut();
    for timer in [
        peer.idle_timer.take(),
        peer.rr_timer.take(),
        peer.busy_poll_timer.take(),
        peer.ack_timer.take(),
    ]
    .into_iter()
    .flatten()
    {
        timer.cancel();
    }
    if let Some(request) = peer.request.take() {
        if let Some(timer) = request.timer {
            timer.cancel();
        }
    }
    let remote = peer.remote.clone();
    let on_drop = Rc::clone(&peer.on_drop);
    drop(peer);
    on_drop(&remote);
}

fn transmit_frame(inner: &Rc<RefCell<PeerInner>>, frame: AX25Frame) {
    reset_idle_timeout(inner);
    let interface = inner.borrow().interface.clone();
    interface.transmit(frame);
}

fn header_to_peer(peer: &PeerInner, cr: bool, path: AX25Path) -> AX25FrameHeader {
    AX25FrameHeader::new(peer.remote.clone(), peer.our_address.clone(), path, cr)
}

fn send_u_frame(inner: &Rc<RefCell<PeerInner>>, body: UnnumberedFrame, cr: bool) -> AX25Frame {
    let path = current_reply_path(inner);
    let frame = {
        let peer = inner.borrow();
        AX25Frame::new(
            header_to_peer(&peer, cr, path),
            AX25FrameBody::Unnumbered(body),
        )
    };
    transmit_frame(inner, frame.clone());
    frame
}

fn send_dm(inner: &Rc<RefCell<PeerInner>>) {
    debug!("sending DM");
    send_u_frame(inner, UnnumberedFrame::DisconnectMode { pf: false }, false);
}

fn send_ua(inner: &Rc<RefCell<PeerInner>>) {
    debug!("sending UA");
    send_u_frame(
        inner,
        UnnumberedFrame::UnnumberedAcknowledge { pf: false },
        false,
    );
}

// Enter the frame-reject condition and tell the peer why (AX.25 2.0
// §2.4.5). The same FRMR is retransmitted for anything that arrives
// until a SABM, DISC or DM clears the condition.
fn send_frmr(inner: &Rc<RefCell<PeerInner>>, rejected: &AX25Frame, w: bool, x: bool, y: bool, z: bool) {
    debug!("sending FRMR in reply to {rejected}");
    set_state(inner, AX25PeerState::FrameReject);
    let body = {
        let peer = inner.borrow();
        UnnumberedFrame::FrameReject {
            pf: false,
            w,
            x,
            y,
            z,
            vr: peer.vr,
            frmr_cr: rejected.header.cr,
            vs: peer.vs,
            frmr_control: rejected.body_bytes().first().copied().unwrap_or(0),
        }
    };
    let frame = send_u_frame(inner, body, false);
    inner.borrow_mut().frmr_frame = Some(frame);
}

fn local_capabilities(peer: &PeerInner) -> XidCapabilities {
    XidCapabilities {
        full_duplex: false,
        srej: true,
        rej: true,
        modulo128: true,
        max_ifield: peer.config.max_ifield,
        max_outstanding: peer.config.max_outstanding_mod128,
        ack_timeout_ms: peer.config.ack_timeout.as_millis() as u32,
        retries: peer.config.max_retries,
    }
}

fn xid_frame(peer: &PeerInner, cr: bool, path: AX25Path) -> AX25Frame {
    AX25Frame::new(
        header_to_peer(peer, cr, path),
        AX25FrameBody::Unnumbered(UnnumberedFrame::ExchangeIdentification {
            pf: true,
            fi: XID_FI_AX25,
            gi: XID_GI_PARAMETER_NEGOTIATION,
            parameters: local_capabilities(peer).to_parameters(),
        }),
    )
}

fn arm_request_timer(inner: &Rc<RefCell<PeerInner>>) {
    let mut guard = inner.borrow_mut();
    let peer = &mut *guard;
    let delay = t1(peer);
    let weak = Rc::downgrade(inner);
    if let Some(request) = peer.request.as_mut() {
        if let Some(timer) = request.timer.take() {
            timer.cancel();
        }
        request.timer = Some(peer.reactor.call_later(delay, move || {
            if let Some(inner) = weak.upgrade() {
                on_request_timeout(&inner);
            }
        }));
    }
}

fn on_request_timeout(inner: &Rc<RefCell<PeerInner>>) {
    let retry = {
        let mut peer = inner.borrow_mut();
        let Some(request) = peer.request.as_mut() else {
            return;
        };
        request.timer = None;
        if request.retries_left == 0 {
            None
        } else {
            request.retries_left -= 1;
            Some(request.frame.clone())
        }
    };
    match retry {
        Some(frame) => {
            debug!("request timer expired; retransmitting");
            transmit_frame(inner, frame);
            arm_request_timer(inner);
        }
        None => {
            warn!("request retries exhausted");
            set_state(inner, AX25PeerState::Disconnected);
            finish_request(inner, RequestOutcome::Timeout);
        }
    }
}

fn finish_request(inner: &Rc<RefCell<PeerInner>>, outcome: RequestOutcome) {
    let request = inner.borrow_mut().request.take();
    if let Some(request) = request {
        if let Some(timer) = request.timer {
            timer.cancel();
        }
        let done = request.handle.done();
        let reactor = inner.borrow().reactor.clone();
        reactor.call_soon(move || done.emit(&outcome));
    }
}

fn start_negotiation(inner: &Rc<RefCell<PeerInner>>, handle: RequestHandle) {
    set_state(inner, AX25PeerState::Negotiating);
    let frame = {
        let path = current_reply_path(inner);
        let mut peer = inner.borrow_mut();
        let frame = xid_frame(&peer, true, path);
        let retries = peer.config.max_retries;
        peer.request = Some(CurrentRequest {
            kind: RequestKind::Negotiate,
            retries_left: retries,
            timer: None,
            frame: frame.clone(),
            handle,
        });
        frame
    };
    transmit_frame(inner, frame);
    arm_request_timer(inner);
}

fn start_connect(inner: &Rc<RefCell<PeerInner>>, handle: RequestHandle) {
    set_state(inner, AX25PeerState::Connecting);
    let frame = {
        let path = current_reply_path(inner);
        let mut peer = inner.borrow_mut();
        let modulo128 = peer.negotiated.as_ref().is_some_and(|n| n.modulo128);
        let body = if modulo128 {
            UnnumberedFrame::SetAsyncBalancedModeExtended { pf: true }
        } else {
            UnnumberedFrame::SetAsyncBalancedMode { pf: true }
        };
        let frame = AX25Frame::new(
            header_to_peer(&peer, true, path),
            AX25FrameBody::Unnumbered(body),
        );
        let retries = max_retries(&peer);
        peer.request = Some(CurrentRequest {
            kind: RequestKind::Connect,
            retries_left: retries,
            timer: None,
            frame: frame.clone(),
            handle,
        });
        frame
    };
    transmit_frame(inner, frame);
    arm_request_timer(inner);
}

fn start_disconnect(inner: &Rc<RefCell<PeerInner>>, handle: RequestHandle) {
    set_state(inner, AX25PeerState::Disconnecting);
    let frame = {
        let path = current_reply_path(inner);
        let mut peer = inner.borrow_mut();
        let frame = AX25Frame::new(
            header_to_peer(&peer, true, path),
            AX25FrameBody::Unnumbered(UnnumberedFrame::Disconnect { pf: true }),
        );
        let retries = max_retries(&peer);
        peer.request = Some(CurrentRequest {
            kind: RequestKind::Disconnect,
            retries_left: retries,
            timer: None,
            frame: frame.clone(),
            handle,
        });
        frame
    };
    transmit_frame(inner, frame);
    arm_request_timer(inner);
}

fn init_connection(inner: &Rc<RefCell<PeerInner>>, modulo128: bool) {
    let mut peer = inner.borrow_mut();
    peer.modulo128 = modulo128;
    peer.max_outstanding = match (&peer.negotiated, modulo128) {
        (Some(negotiated), _) if negotiated.modulo128 == modulo128 => negotiated.max_outstanding,
        (_, true) => peer.config.max_outstanding_mod128,
        (_, false) => peer.config.max_outstanding_mod8,
    };
    if !modulo128 {
        peer.max_outstanding = peer.max_outstanding.min(7);
    }
    peer.vs = 0;
    peer.vr = 0;
    peer.va = 0;
    peer.local_busy = false;
    peer.peer_busy = false;
    peer.ack_retries = 0;
    // Data queued with `send` before the link came up stays queued;
    // unacknowledged in-flight frames from an earlier session do not.
    peer.pending_iframes.clear();
    peer.frmr_frame = None;
    if let Some(timer) = peer.ack_timer.take() {
        timer.cancel();
    }
}

fn on_receive(inner: &Rc<RefCell<PeerInner>>, frame: &AX25Frame) {
    reset_idle_timeout(inner);

    {
        let mut peer = inner.borrow_mut();
        if !peer.locked_path {
            // Learn the reply path (transmit order) frames arrive by.
            let key = path_key(&frame.header.repeaters.reply());
            *peer.rx_path_count.entry(key).or_insert(0) += 1;
        }
    }

    let state = inner.borrow().state;

    // AX.25 2.2 §6.3.1: while a SABM(E) is outstanding, ignore
    // everything except SABM, DISC, UA and DM.
    if state == AX25PeerState::Connecting
        && !matches!(
            &frame.body,
            AX25FrameBody::Unnumbered(
                UnnumberedFrame::SetAsyncBalancedMode { .. }
                    | UnnumberedFrame::SetAsyncBalancedModeExtended { .. }
                    | UnnumberedFrame::Disconnect { .. }
                    | UnnumberedFrame::UnnumberedAcknowledge { .. }
                    | UnnumberedFrame::DisconnectMode { .. }
            )
        )
    {
        debug!("dropping frame while awaiting SABM UA: {frame}");
        return;
    }

    // AX.25 2.0 §2.4.5: in the frame-reject condition, anything other
    // than SABM, DISC or DM provokes the same FRMR again.
    if state == AX25PeerState::FrameReject
        && !matches!(
            &frame.body,
            AX25FrameBody::Unnumbered(
                UnnumberedFrame::SetAsyncBalancedMode { .. }
                    | UnnumberedFrame::Disconnect { .. }
                    | UnnumberedFrame::DisconnectMode { .. }
            )
        )
    {
        let again = inner.borrow().frmr_frame.clone();
        if let Some(again) = again {
            debug!("retransmitting FRMR in response to {frame}");
            transmit_frame(inner, again);
        }
        return;
    }

    match &frame.body {
        AX25FrameBody::Unnumbered(u) => match u {
            UnnumberedFrame::Test { payload, .. } => {
                let (signal, reactor) = {
                    let peer = inner.borrow();
                    (peer.test_response.clone(), peer.reactor.clone())
                };
                let payload = payload.clone();
                reactor.call_soon(move || signal.emit(&payload));
            }
            UnnumberedFrame::SetAsyncBalancedMode { .. } => on_receive_sabm(inner, frame, false),
            UnnumberedFrame::SetAsyncBalancedModeExtended { .. } => {
                on_receive_sabm(inner, frame, true)
            }
            UnnumberedFrame::Disconnect { .. } => on_receive_disc(inner),
            UnnumberedFrame::DisconnectMode { .. } => on_receive_dm(inner),
            UnnumberedFrame::UnnumberedAcknowledge { .. } => on_receive_ua(inner),
            UnnumberedFrame::ExchangeIdentification { parameters, .. } => {
                on_receive_xid(inner, frame, parameters)
            }
            UnnumberedFrame::FrameReject { w, .. } => on_receive_frmr(inner, *w),
            UnnumberedFrame::UnnumberedInformation { .. } => {
                debug!("ignoring UI from peer: {frame}");
            }
            UnnumberedFrame::Other { modifier, .. } => {
                debug!("ignoring U frame with modifier 0x{modifier:02x}");
            }
        },
        AX25FrameBody::Raw { .. } => {
            if state == AX25PeerState::Connected {
                let modulo128 = inner.borrow().modulo128;
                match frame.redecode(modulo128) {
                    Ok(decoded) => match decoded.body {
                        AX25FrameBody::Information(i) => on_receive_iframe(inner, &i),
                        AX25FrameBody::Supervisory(s) => on_receive_sframe(inner, &s),
                        _ => debug!("dropping unrecognised frame: {decoded}"),
                    },
                    Err(e) => debug!("dropping undecodable I/S frame: {e}"),
                }
            } else {
                // No connection in progress.
                send_dm(inner);
            }
        }
        AX25FrameBody::Information(i) => {
            if state == AX25PeerState::Connected {
                on_receive_iframe(inner, i);
            } else {
                send_dm(inner);
            }
        }
        AX25FrameBody::Supervisory(s) => {
            if state == AX25PeerState::Connected {
                on_receive_sframe(inner, s);
            } else {
                send_dm(inner);
            }
        }
    }
}

fn on_receive_sabm(inner: &Rc<RefCell<PeerInner>>, frame: &AX25Frame, modulo128: bool) {
    debug!("received SABM(E), extended={modulo128}");
    if modulo128 {
        {
            let mut peer = inner.borrow_mut();
            // A station that sends SABME speaks AX.25 2.2.
            if peer.peer_protocol.is_none() {
                peer.peer_protocol = Some(AX25Version::Ax25_22);
            }
        }
        let (ours, theirs) = {
            let peer = inner.borrow();
            (peer.config.protocol, peer.peer_protocol)
        };
        if ours != AX25Version::Ax25_22 {
            // "A TNC that uses a version of AX.25 prior to v2.2
            // responds with a FRMR"; W marks the control field as not
            // understood.
            warn!("sending FRMR: we are not in AX.25 2.2 mode");
            send_frmr(inner, frame, true, false, false, false);
            return;
        }
        if theirs != Some(AX25Version::Ax25_22) {
            // "If the TNC is not capable of accepting a SABME, it
            // responds with a DM frame."
            warn!("sending DM: peer is not in AX.25 2.2 mode");
            send_dm(inner);
            return;
        }
    }
    init_connection(inner, modulo128);
    set_state(inner, AX25PeerState::Connected);
    send_ua(inner);
    let (signal, reactor) = {
        let peer = inner.borrow();
        (peer.connection_request.clone(), peer.reactor.clone())
    };
    let handle = handle_of(inner);
    reactor.call_soon(move || signal.emit(&handle));
}

fn on_receive_disc(inner: &Rc<RefCell<PeerInner>>) {
    info!("received DISC from peer");
    on_disconnect(inner);
    send_ua(inner);
}

fn on_receive_dm(inner: &Rc<RefCell<PeerInner>>) {
    info!("received DM from peer");
    let refused = inner
        .borrow()
        .request
        .as_ref()
        .is_some_and(|request| request.kind != RequestKind::Disconnect);
    on_disconnect(inner);
    if refused {
        finish_request(inner, RequestOutcome::Refused);
    } else {
        finish_request(inner, RequestOutcome::Disconnected);
    }
}

fn on_receive_ua(inner: &Rc<RefCell<PeerInner>>) {
    let kind = inner.borrow().request.as_ref().map(|request| request.kind);
    match kind {
        Some(RequestKind::Connect) => {
            let modulo128 = inner.borrow().negotiated.as_ref().is_some_and(|n| n.modulo128);
            init_connection(inner, modulo128);
            set_state(inner, AX25PeerState::Connected);
            finish_request(inner, RequestOutcome::Established);
            send_pending(inner);
        }
        Some(RequestKind::Disconnect) => {
            on_disconnect(inner);
            finish_request(inner, RequestOutcome::Disconnected);
        }
        _ => debug!("ignoring unsolicited UA"),
    }
}

fn on_receive_xid(inner: &Rc<RefCell<PeerInner>>, frame: &AX25Frame, parameters: &[XidParameter]) {
    {
        let peer = inner.borrow();
        if peer.config.protocol != AX25Version::Ax25_22 {
            drop(peer);
            // Not supported before 2.2.
            warn!("received XID while not in AX.25 2.2 mode");
            send_frmr(inner, frame, true, false, false, false);
            return;
        }
        if matches!(
            peer.state,
            AX25PeerState::Connecting | AX25PeerState::Disconnecting
        ) {
            // AX.25 2.2 §4.3.3.7: no XID response while a mode-setting
            // command is in flight.
            warn!("UA is pending; dropping received XID");
            return;
        }
    }

    let remote = XidCapabilities::from_parameters(parameters);
    if frame.header.cr {
        // XID command: negotiate and reply with our own parameters.
        let (response, negotiated) = {
            let path = current_reply_path(inner);
            let mut peer = inner.borrow_mut();
            peer.peer_protocol = Some(AX25Version::Ax25_22);
            let local = local_capabilities(&peer);
            let negotiated = local.negotiate(&remote);
            peer.negotiated = Some(negotiated.clone());
            (xid_frame(&peer, false, path), negotiated)
        };
        debug!("negotiated by XID command: {negotiated:?}");
        transmit_frame(inner, response);
    } else {
        // XID response to our own request.
        let is_negotiation = inner
            .borrow()
            .request
            .as_ref()
            .is_some_and(|request| request.kind == RequestKind::Negotiate);
        let negotiated = {
            let mut peer = inner.borrow_mut();
            peer.peer_protocol = Some(AX25Version::Ax25_22);
            let negotiated = local_capabilities(&peer).negotiate(&remote);
            peer.negotiated = Some(negotiated.clone());
            negotiated
        };
        debug!("negotiated by XID response: {negotiated:?}");
        if is_negotiation {
            let handle = {
                let mut peer = inner.borrow_mut();
                let request = peer.request.take().unwrap();
                if let Some(timer) = request.timer {
                    timer.cancel();
                }
                request.handle
            };
            start_connect(inner, handle);
        }
    }
}

fn on_receive_frmr(inner: &Rc<RefCell<PeerInner>>, w: bool) {
    warn!("received FRMR (W={w})");
    let kind = inner.borrow().request.as_ref().map(|request| request.kind);
    if kind == Some(RequestKind::Negotiate) {
        // The peer didn't understand XID: it speaks AX.25 2.0. Fall
        // back to a plain modulo-8 SABM.
        let handle = {
            let mut peer = inner.borrow_mut();
            peer.peer_protocol = Some(AX25Version::Ax25_20);
            peer.negotiated = None;
            let request = peer.request.take().unwrap();
            if let Some(timer) = request.timer {
                timer.cancel();
            }
            request.handle
        };
        start_connect(inner, handle);
    }
}

fn on_disconnect(inner: &Rc<RefCell<PeerInner>>) {
    set_state(inner, AX25PeerState::Disconnected);
    let mut peer = inner.borrow_mut();
    peer.vs = 0;
    peer.vr = 0;
    peer.va = 0;
    peer.pending_iframes.clear();
    peer.pending_data.clear();
    peer.frmr_frame = None;
    peer.local_busy = false;
    peer.peer_busy = false;
    for timer in [
        peer.rr_timer.take(),
        peer.busy_poll_timer.take(),
        peer.ack_timer.take(),
    ]
    .into_iter()
    .flatten()
    {
        timer.cancel();
    }
}

fn on_receive_iframe(inner: &Rc<RefCell<PeerInner>>, i: &InformationFrame) {
    cancel_rr_notification(inner);

    {
        let peer = inner.borrow();
        // AX.25 2.2 §6.4.2.2: in the busy condition I frames are
        // dropped, repeating only the busy indication.
        if peer.local_busy {
            drop(peer);
            warn!("dropping I frame during busy condition");
            send_rnr_notification(inner);
            return;
        }
    }

    // The piggybacked N(R) acknowledges our traffic either way.
    update_ack(inner, i.nr, false);

    {
        let mut peer = inner.borrow_mut();
        if i.ns != peer.vr {
            // Out of sequence; recovery is the reject machinery's job.
            debug!("ignoring I frame with N(S)={} (V(R)={})", i.ns, peer.vr);
            return;
        }
        peer.vr = (peer.vr + 1) % modulo(&peer);
    }

    let (signal, reactor) = {
        let peer = inner.borrow();
        (peer.received_information.clone(), peer.reactor.clone())
    };
    let event = i.clone();
    reactor.call_soon(move || signal.emit(&event));

    let piggyback = {
        let peer = inner.borrow();
        !peer.pending_data.is_empty() && outstanding(&peer) < peer.max_outstanding
    };
    if piggyback {
        // The acknowledgement rides on the next I frame's N(R).
        send_pending(inner);
    } else {
        schedule_rr_notification(inner);
    }
}

fn on_receive_sframe(inner: &Rc<RefCell<PeerInner>>, s: &SupervisoryFrame) {
    update_ack(inner, s.nr, true);
    match s.code {
        SupervisoryCode::ReceiveReady => {
            {
                let mut peer = inner.borrow_mut();
                peer.peer_busy = false;
                if let Some(timer) = peer.busy_poll_timer.take() {
                    timer.cancel();
                }
            }
            send_pending(inner);
        }
        SupervisoryCode::ReceiveNotReady => {
            inner.borrow_mut().peer_busy = true;
            schedule_busy_poll(inner);
        }
        SupervisoryCode::Reject => {
            debug!("REJ: retransmitting from N(R)={}", s.nr);
            {
                let mut peer = inner.borrow_mut();
                peer.peer_busy = false;
                let key = path_key(&current_reply_path_locked(&mut peer));
                *peer.tx_path_score.entry(key).or_insert(0) -= 1;
            }
            retransmit_from(inner, s.nr);
        }
        SupervisoryCode::SelectiveReject => {
            debug!("SREJ: retransmitting N(R)={}", s.nr);
            {
                let mut peer = inner.borrow_mut();
                let key = path_key(&current_reply_path_locked(&mut peer));
                *peer.tx_path_score.entry(key).or_insert(0) -= 1;
            }
            let held = inner.borrow().pending_iframes.contains_key(&s.nr);
            if held {
                transmit_iframe(inner, s.nr);
            }
        }
    }
}

// reply-path computation when the inner borrow is already held.
fn current_reply_path_locked(peer: &mut PeerInner) -> AX25Path {
    if let Some(path) = &peer.reply_path {
        return path.clone();
    }
    if peer.locked_path {
        return peer.configured_path.clone();
    }
    let best = peer
        .tx_path_score
        .iter()
        .max_by_key(|(_, score)| **score)
        .map(|(path, _)| path.clone())
        .or_else(|| {
            peer.rx_path_count
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(path, _)| path.clone())
        })
        .unwrap_or_default();
    let path = AX25Path::new(best);
    peer.reply_path = Some(path.clone());
    path
}

// Advance V(A) to an inbound N(R), releasing acknowledged I frames.
// With `kick`, freed window slots are refilled immediately; the
// I-frame receive path defers that until V(R) has advanced so that a
// piggybacked acknowledgement rides out on the new frames.
fn update_ack(inner: &Rc<RefCell<PeerInner>>, nr: u8, kick: bool) {
    let acked = {
        let mut peer = inner.borrow_mut();
        let m = modulo(&peer);
        let distance = (u16::from(nr) + u16::from(m) - u16::from(peer.va)) % u16::from(m);
        if distance > u16::from(outstanding(&peer)) {
            debug!("ignoring N(R)={nr} outside window (V(A)={} V(S)={})", peer.va, peer.vs);
            return;
        }
        let mut acked = 0;
        while peer.va != nr {
            let va = peer.va;
            peer.pending_iframes.remove(&va);
            peer.va = (peer.va + 1) % m;
            acked += 1;
        }
        if acked > 0 {
            let key = path_key(&current_reply_path_locked(&mut peer));
            *peer.tx_path_score.entry(key).or_insert(0) += 1;
            peer.ack_retries = 0;
            if let Some(timer) = peer.ack_timer.take() {
                timer.cancel();
            }
        }
        acked
    };
    if acked > 0 {
        let has_outstanding = !inner.borrow().pending_iframes.is_empty();
        if has_outstanding {
            start_ack_timer(inner);
        }
        if kick {
            send_pending(inner);
        }
    }
}

fn retransmit_from(inner: &Rc<RefCell<PeerInner>>, nr: u8) {
    let to_send: Vec<u8> = {
        let peer = inner.borrow();
        let m = modulo(&peer);
        let mut ns = nr;
        let mut out = Vec::new();
        while ns != peer.vs {
            if peer.pending_iframes.contains_key(&ns) {
                out.push(ns);
            }
            ns = (ns + 1) % m;
        }
        out
    };
    for ns in to_send {
        transmit_iframe(inner, ns);
    }
}

// Send queued payloads while the window allows.
fn send_pending(inner: &Rc<RefCell<PeerInner>>) {
    loop {
        let ns = {
            let mut peer = inner.borrow_mut();
            if peer.state != AX25PeerState::Connected
                || peer.peer_busy
                || peer.pending_data.is_empty()
                || outstanding(&peer) >= peer.max_outstanding
            {
                return;
            }
            // AX.25 2.2 §6.4.1: N(S) takes the send state variable.
            let ns = peer.vs;
            debug_assert!(
                !peer.pending_iframes.contains_key(&ns),
                "duplicate N(S) pending"
            );
            let (pid, payload) = peer.pending_data.pop_front().unwrap();
            peer.pending_iframes.insert(ns, (pid, payload));
            peer.vs = (peer.vs + 1) % modulo(&peer);
            ns
        };
        transmit_iframe(inner, ns);
        start_ack_timer(inner);
    }
}

fn transmit_iframe(inner: &Rc<RefCell<PeerInner>>, ns: u8) {
    let path = current_reply_path(inner);
    let frame = {
        let peer = inner.borrow();
        let Some((pid, payload)) = peer.pending_iframes.get(&ns) else {
            return;
        };
        AX25Frame::new(
            header_to_peer(&peer, true, path),
            AX25FrameBody::Information(InformationFrame {
                nr: peer.vr,
                ns,
                pf: false,
                pid: *pid,
                payload: payload.clone(),
                modulo128: peer.modulo128,
            }),
        )
    };
    transmit_frame(inner, frame);
}

fn start_ack_timer(inner: &Rc<RefCell<PeerInner>>) {
    let mut peer = inner.borrow_mut();
    if peer.ack_timer.is_some() {
        return;
    }
    let weak = Rc::downgrade(inner);
    let delay = t1(&peer);
    peer.ack_timer = Some(peer.reactor.call_later(delay, move || {
        if let Some(inner) = weak.upgrade() {
            on_ack_timeout(&inner);
        }
    }));
}

// T1 expiry: the peer hasn't acknowledged the window. Retransmit it,
// and give up on the link once the retry budget is gone.
fn on_ack_timeout(inner: &Rc<RefCell<PeerInner>>) {
    let action = {
        let mut peer = inner.borrow_mut();
        peer.ack_timer = None;
        if peer.pending_iframes.is_empty() {
            None
        } else {
            peer.ack_retries += 1;
            if peer.ack_retries > max_retries(&peer) {
                Some(false)
            } else {
                Some(true)
            }
        }
    };
    match action {
        None => {}
        Some(true) => {
            let va = inner.borrow().va;
            debug!("T1 expired; retransmitting from V(A)={va}");
            retransmit_from(inner, va);
            start_ack_timer(inner);
        }
        Some(false) => {
            warn!("T1 retries exhausted; link failure");
            send_dm(inner);
            on_disconnect(inner);
        }
    }
}

// While the peer reports busy, poll it with RR every rr_interval
// until it comes back.
fn schedule_busy_poll(inner: &Rc<RefCell<PeerInner>>) {
    let mut peer = inner.borrow_mut();
    if peer.busy_poll_timer.is_some() {
        return;
    }
    let weak = Rc::downgrade(inner);
    let interval = peer.config.rr_interval;
    peer.busy_poll_timer = Some(peer.reactor.call_later(interval, move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        {
            let mut peer = inner.borrow_mut();
            peer.busy_poll_timer = None;
            if !peer.peer_busy || peer.state != AX25PeerState::Connected {
                return;
            }
        }
        send_rr_poll(&inner);
        schedule_busy_poll(&inner);
    }));
}

fn send_rr_poll(inner: &Rc<RefCell<PeerInner>>) {
    let path = current_reply_path(inner);
    let frame = {
        let peer = inner.borrow();
        AX25Frame::new(
            header_to_peer(&peer, true, path),
            AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::ReceiveReady,
                nr: peer.vr,
                pf: true,
                modulo128: peer.modulo128,
            }),
        )
    };
    transmit_frame(inner, frame);
}

fn cancel_rr_notification(inner: &Rc<RefCell<PeerInner>>) {
    if let Some(timer) = inner.borrow_mut().rr_timer.take() {
        timer.cancel();
    }
}

// Cancel any prior pending RR, then acknowledge after rr_delay unless
// an I frame carries the acknowledgement first.
fn schedule_rr_notification(inner: &Rc<RefCell<PeerInner>>) {
    cancel_rr_notification(inner);
    let mut peer = inner.borrow_mut();
    let weak = Rc::downgrade(inner);
    let delay = peer.config.rr_delay;
    peer.rr_timer = Some(peer.reactor.call_later(delay, move || {
        if let Some(inner) = weak.upgrade() {
            send_rr_notification(&inner);
        }
    }));
}

fn send_rr_notification(inner: &Rc<RefCell<PeerInner>>) {
    cancel_rr_notification(inner);
    let path = current_reply_path(inner);
    let frame = {
        let peer = inner.borrow();
        AX25Frame::new(
            header_to_peer(&peer, false, path),
            AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::ReceiveReady,
                nr: peer.vr,
                pf: false,
                modulo128: peer.modulo128,
            }),
        )
    };
    transmit_frame(inner, frame);
}

// RNR, throttled to one per rnr_interval.
fn send_rnr_notification(inner: &Rc<RefCell<PeerInner>>) {
    {
        let mut peer = inner.borrow_mut();
        let now = peer.reactor.time();
        if let Some(last) = peer.last_rnr_sent {
            if now.saturating_sub(last) <= peer.config.rnr_interval {
                return;
            }
        }
        peer.last_rnr_sent = Some(now);
    }
    let path = current_reply_path(inner);
    let frame = {
        let peer = inner.borrow();
        AX25Frame::new(
            header_to_peer(&peer, false, path),
            AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::ReceiveNotReady,
                nr: peer.vr,
                pf: false,
                modulo128: peer.modulo128,
            }),
        )
    };
    transmit_frame(inner, frame);
}

impl AX25Peer {
    /// Set or clear the local busy condition. While busy, inbound I
    /// frames are dropped and answered with throttled RNR.
    pub fn set_local_busy(&self, busy: bool) {
        self.inner.borrow_mut().local_busy = busy;
        if !busy {
            send_rr_notification(&self.inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::StationConfig;
    use crate::frame::pid;
    use crate::station::tests::{Rig, rig};
    use crate::testutil::{addr, sent_frames};
    use crate::xid::XidCapabilities;

    fn fast_config() -> StationConfig {
        let mut config = StationConfig::new("VK4MSL", 5);
        config.ack_timeout = Duration::from_millis(100);
        config.rr_delay = Duration::from_millis(50);
        config
    }

    fn reply_frame(body: AX25FrameBody) -> AX25Frame {
        AX25Frame::new(
            AX25FrameHeader::new(addr("VK4MSL-5"), addr("VK4BWI"), AX25Path::empty(), false),
            body,
        )
    }

    fn command_frame(body: AX25FrameBody) -> AX25Frame {
        AX25Frame::new(
            AX25FrameHeader::new(addr("VK4MSL-5"), addr("VK4BWI"), AX25Path::empty(), true),
            body,
        )
    }

    fn connect_inbound(r: &Rig) -> AX25Peer {
        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Unnumbered(
                UnnumberedFrame::SetAsyncBalancedMode { pf: true },
            )),
        );
        r.reactor.advance(Duration::from_millis(10));
        r.sent.borrow_mut().clear();
        r.station.peer_if_known(&addr("VK4BWI")).unwrap()
    }

    fn outcomes(handle: &RequestHandle) -> Rc<RefCell<Vec<RequestOutcome>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let clone = Rc::clone(&seen);
        handle.done().connect(move |outcome: &RequestOutcome| {
            clone.borrow_mut().push(*outcome);
        });
        seen
    }

    fn iframes_sent(r: &Rig) -> Vec<InformationFrame> {
        sent_frames(&r.sent)
            .iter()
            .filter_map(|frame| match frame.redecode(false) {
                Ok(AX25Frame {
                    body: AX25FrameBody::Information(i),
                    ..
                }) => Some(i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_negotiates_then_establishes() {
        let r = rig(fast_config());
        let peer = r.station.peer(&addr("VK4BWI"));
        let handle = peer.connect();
        let seen = outcomes(&handle);
        r.reactor.advance(Duration::from_millis(10));

        // First an XID command goes out.
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].header.cr);
        assert!(matches!(
            &frames[0].body,
            AX25FrameBody::Unnumbered(UnnumberedFrame::ExchangeIdentification { .. })
        ));
        assert_eq!(peer.state(), AX25PeerState::Negotiating);
        r.sent.borrow_mut().clear();

        // The responder offers a smaller window and no modulo 128.
        let remote = XidCapabilities {
            max_ifield: 128,
            max_outstanding: 4,
            ack_timeout_ms: 10_000,
            retries: 20,
            ..Default::default()
        };
        crate::testutil::inject(
            &r.device,
            0,
            &reply_frame(AX25FrameBody::Unnumbered(
                UnnumberedFrame::ExchangeIdentification {
                    pf: true,
                    fi: XID_FI_AX25,
                    gi: XID_GI_PARAMETER_NEGOTIATION,
                    parameters: remote.to_parameters(),
                },
            )),
        );
        r.reactor.advance(Duration::from_millis(10));

        // Modulo 8 won: plain SABM.
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0].body,
            AX25FrameBody::Unnumbered(UnnumberedFrame::SetAsyncBalancedMode { .. })
        ));
        assert_eq!(peer.state(), AX25PeerState::Connecting);
        r.sent.borrow_mut().clear();

        crate::testutil::inject(
            &r.device,
            0,
            &reply_frame(AX25FrameBody::Unnumbered(
                UnnumberedFrame::UnnumberedAcknowledge { pf: true },
            )),
        );
        r.reactor.advance(Duration::from_millis(10));
        assert_eq!(peer.state(), AX25PeerState::Connected);
        assert!(!peer.modulo128());
        assert_eq!(*seen.borrow(), vec![RequestOutcome::Established]);

        // The negotiated window of 4 caps outstanding I frames.
        for _ in 0..6 {
            peer.send(pid::NO_L3, b"x");
        }
        r.reactor.advance(Duration::from_millis(20));
        assert_eq!(iframes_sent(&r).len(), 4);
        let (va, vs, _vr, keys) = peer.debug_window();
        assert_eq!((va, vs), (0, 4));
        assert_eq!(keys, vec![0, 1, 2, 3]);
    }

    #[test]
    fn connect_times_out_after_retries() {
        let mut config = fast_config();
        config.max_retries = 2;
        let r = rig(config);
        let peer = r.station.peer(&addr("VK4BWI"));
        let handle = peer.connect();
        let seen = outcomes(&handle);
        r.reactor.advance(Duration::from_secs(2));

        // Initial attempt plus two retries, then the caller hears
        // about it exactly once.
        let xids = sent_frames(&r.sent)
            .iter()
            .filter(|frame| {
                matches!(
                    &frame.body,
                    AX25FrameBody::Unnumbered(UnnumberedFrame::ExchangeIdentification { .. })
                )
            })
            .count();
        assert_eq!(xids, 3);
        assert_eq!(*seen.borrow(), vec![RequestOutcome::Timeout]);
        assert_eq!(peer.state(), AX25PeerState::Disconnected);
    }

    #[test]
    fn connect_refused_by_dm() {
        let r = rig(fast_config());
        let peer = r.station.peer(&addr("VK4BWI"));
        let handle = peer.connect();
        let seen = outcomes(&handle);
        r.reactor.advance(Duration::from_millis(10));
        crate::testutil::inject(
            &r.device,
            0,
            &reply_frame(AX25FrameBody::Unnumbered(UnnumberedFrame::DisconnectMode {
                pf: true,
            })),
        );
        r.reactor.advance(Duration::from_millis(10));
        assert_eq!(*seen.borrow(), vec![RequestOutcome::Refused]);
        assert_eq!(peer.state(), AX25PeerState::Disconnected);
    }

    #[test]
    fn frmr_reply_to_xid_falls_back_to_sabm() {
        let r = rig(fast_config());
        let peer = r.station.peer(&addr("VK4BWI"));
        let _handle = peer.connect();
        r.reactor.advance(Duration::from_millis(10));
        r.sent.borrow_mut().clear();
        crate::testutil::inject(
            &r.device,
            0,
            &reply_frame(AX25FrameBody::Unnumbered(UnnumberedFrame::FrameReject {
                pf: true,
                w: true,
                x: false,
                y: false,
                z: false,
                vr: 0,
                frmr_cr: true,
                vs: 0,
                frmr_control: 0xaf,
            })),
        );
        r.reactor.advance(Duration::from_millis(10));
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0].body,
            AX25FrameBody::Unnumbered(UnnumberedFrame::SetAsyncBalancedMode { .. })
        ));
        assert_eq!(peer.state(), AX25PeerState::Connecting);
    }

    #[test]
    fn window_fills_and_drains_in_sequence() {
        let r = rig(fast_config());
        let peer = connect_inbound(&r);
        for n in 0..10u8 {
            peer.send(pid::NO_L3, &[n]);
        }
        r.reactor.advance(Duration::from_millis(20));
        let sent = iframes_sent(&r);
        assert_eq!(sent.len(), 7);
        let (va, vs, _vr, keys) = peer.debug_window();
        assert_eq!((va, vs), (0, 7));
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5, 6]);
        r.sent.borrow_mut().clear();

        // RR acknowledging the whole window lets the tail go, with
        // N(S) wrapping modulo 8.
        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::ReceiveReady,
                nr: 7,
                pf: false,
                modulo128: false,
            })),
        );
        r.reactor.advance(Duration::from_millis(20));
        let sent = iframes_sent(&r);
        assert_eq!(sent.iter().map(|i| i.ns).collect::<Vec<_>>(), vec![7, 0, 1]);
        let (va, vs, _vr, keys) = peer.debug_window();
        assert_eq!((va, vs), (7, 2));
        assert_eq!(keys, vec![0, 1, 7]);
    }

    #[test]
    fn rej_triggers_retransmission() {
        let r = rig(fast_config());
        let peer = connect_inbound(&r);
        for n in 0..3u8 {
            peer.send(pid::NO_L3, &[n]);
        }
        r.reactor.advance(Duration::from_millis(20));
        assert_eq!(iframes_sent(&r).len(), 3);
        r.sent.borrow_mut().clear();

        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::Reject,
                nr: 1,
                pf: false,
                modulo128: false,
            })),
        );
        r.reactor.advance(Duration::from_millis(20));
        let resent = iframes_sent(&r);
        assert_eq!(resent.iter().map(|i| i.ns).collect::<Vec<_>>(), vec![1, 2]);
        let (va, _vs, _vr, _keys) = peer.debug_window();
        assert_eq!(va, 1);
    }

    #[test]
    fn srej_retransmits_exactly_one() {
        let r = rig(fast_config());
        let peer = connect_inbound(&r);
        for n in 0..3u8 {
            peer.send(pid::NO_L3, &[n]);
        }
        r.reactor.advance(Duration::from_millis(20));
        r.sent.borrow_mut().clear();

        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::SelectiveReject,
                nr: 1,
                pf: false,
                modulo128: false,
            })),
        );
        r.reactor.advance(Duration::from_millis(20));
        let resent = iframes_sent(&r);
        assert_eq!(resent.iter().map(|i| i.ns).collect::<Vec<_>>(), vec![1]);
        let _ = peer;
    }

    #[test]
    fn t1_expiry_retransmits_then_fails_link() {
        let mut config = fast_config();
        config.max_retries = 2;
        let r = rig(config);
        let peer = connect_inbound(&r);
        peer.send(pid::NO_L3, b"data");
        r.reactor.advance(Duration::from_millis(20));
        assert_eq!(iframes_sent(&r).len(), 1);

        // Nobody acknowledges: two retransmissions, then the link is
        // declared dead with DM.
        r.reactor.advance(Duration::from_secs(1));
        let frames = sent_frames(&r.sent);
        let iframes = iframes_sent(&r);
        assert_eq!(iframes.len(), 3);
        assert!(matches!(
            &frames.last().unwrap().body,
            AX25FrameBody::Unnumbered(UnnumberedFrame::DisconnectMode { .. })
        ));
        assert_eq!(peer.state(), AX25PeerState::Disconnected);
    }

    #[test]
    fn disconnect_completes_on_ua() {
        let r = rig(fast_config());
        let peer = connect_inbound(&r);
        let handle = peer.disconnect();
        let seen = outcomes(&handle);
        r.reactor.advance(Duration::from_millis(10));
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0].body,
            AX25FrameBody::Unnumbered(UnnumberedFrame::Disconnect { .. })
        ));
        assert_eq!(peer.state(), AX25PeerState::Disconnecting);

        crate::testutil::inject(
            &r.device,
            0,
            &reply_frame(AX25FrameBody::Unnumbered(
                UnnumberedFrame::UnnumberedAcknowledge { pf: true },
            )),
        );
        r.reactor.advance(Duration::from_millis(10));
        assert_eq!(peer.state(), AX25PeerState::Disconnected);
        assert_eq!(*seen.borrow(), vec![RequestOutcome::Disconnected]);
    }

    #[test]
    fn inbound_disc_clears_pending_queues() {
        let r = rig(fast_config());
        let peer = connect_inbound(&r);
        for n in 0..10u8 {
            peer.send(pid::NO_L3, &[n]);
        }
        r.reactor.advance(Duration::from_millis(20));
        r.sent.borrow_mut().clear();

        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Unnumbered(UnnumberedFrame::Disconnect {
                pf: true,
            })),
        );
        r.reactor.advance(Duration::from_millis(20));
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0].body,
            AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedAcknowledge { .. })
        ));
        assert_eq!(peer.state(), AX25PeerState::Disconnected);
        let (va, vs, vr, keys) = peer.debug_window();
        assert_eq!((va, vs, vr), (0, 0, 0));
        assert!(keys.is_empty());
    }

    #[test]
    fn xid_command_is_answered_with_negotiated_response() {
        let r = rig(fast_config());
        let remote = XidCapabilities {
            max_ifield: 64,
            max_outstanding: 2,
            ..Default::default()
        };
        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Unnumbered(
                UnnumberedFrame::ExchangeIdentification {
                    pf: true,
                    fi: XID_FI_AX25,
                    gi: XID_GI_PARAMETER_NEGOTIATION,
                    parameters: remote.to_parameters(),
                },
            )),
        );
        r.reactor.advance(Duration::from_millis(10));
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].header.cr);
        let AX25FrameBody::Unnumbered(UnnumberedFrame::ExchangeIdentification {
            parameters, ..
        }) = &frames[0].body
        else {
            panic!("expected an XID response, got {}", frames[0]);
        };
        let ours = XidCapabilities::from_parameters(parameters);
        assert_eq!(ours.max_ifield, 256);

        // The connection that follows honours the negotiated window.
        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Unnumbered(
                UnnumberedFrame::SetAsyncBalancedMode { pf: true },
            )),
        );
        r.reactor.advance(Duration::from_millis(10));
        r.sent.borrow_mut().clear();
        let peer = r.station.peer_if_known(&addr("VK4BWI")).unwrap();
        for n in 0..4u8 {
            peer.send(pid::NO_L3, &[n]);
        }
        r.reactor.advance(Duration::from_millis(20));
        assert_eq!(iframes_sent(&r).len(), 2);
    }

    #[test]
    fn xid_to_ax25_20_station_gets_frmr() {
        let mut config = fast_config();
        config.protocol = AX25Version::Ax25_20;
        let r = rig(config);
        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Unnumbered(
                UnnumberedFrame::ExchangeIdentification {
                    pf: true,
                    fi: XID_FI_AX25,
                    gi: XID_GI_PARAMETER_NEGOTIATION,
                    parameters: Vec::new(),
                },
            )),
        );
        r.reactor.advance(Duration::from_millis(10));
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0].body,
            AX25FrameBody::Unnumbered(UnnumberedFrame::FrameReject { w: true, .. })
        ));
        let peer = r.station.peer_if_known(&addr("VK4BWI")).unwrap();
        assert_eq!(peer.state(), AX25PeerState::FrameReject);
    }

    #[test]
    fn busy_peer_rnr_throttled() {
        let mut config = fast_config();
        config.rnr_interval = Duration::from_secs(10);
        let r = rig(config);
        let peer = connect_inbound(&r);
        peer.set_local_busy(true);

        let iframe = |ns: u8| {
            command_frame(AX25FrameBody::Information(InformationFrame {
                nr: 0,
                ns,
                pf: false,
                pid: pid::NO_L3,
                payload: b"x".to_vec(),
                modulo128: false,
            }))
        };
        crate::testutil::inject(&r.device, 0, &iframe(0));
        r.reactor.advance(Duration::from_millis(20));
        crate::testutil::inject(&r.device, 0, &iframe(1));
        r.reactor.advance(Duration::from_millis(20));

        let rnrs = sent_frames(&r.sent)
            .iter()
            .filter_map(|frame| frame.redecode(false).ok())
            .filter(|frame| {
                matches!(
                    &frame.body,
                    AX25FrameBody::Supervisory(SupervisoryFrame {
                        code: SupervisoryCode::ReceiveNotReady,
                        ..
                    })
                )
            })
            .count();
        assert_eq!(rnrs, 1);
        // Neither frame was accepted.
        let (_va, _vs, vr, _keys) = peer.debug_window();
        assert_eq!(vr, 0);
    }

    #[test]
    fn busy_peer_polled_with_rr() {
        let mut config = fast_config();
        config.rr_interval = Duration::from_secs(30);
        let r = rig(config);
        let peer = connect_inbound(&r);
        peer.send(pid::NO_L3, b"queued");
        r.reactor.advance(Duration::from_millis(20));
        r.sent.borrow_mut().clear();

        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::ReceiveNotReady,
                nr: 1,
                pf: false,
                modulo128: false,
            })),
        );
        r.reactor.advance(Duration::from_secs(31));
        let polls: Vec<AX25Frame> = sent_frames(&r.sent)
            .iter()
            .filter_map(|frame| frame.redecode(false).ok())
            .filter(|frame| {
                matches!(
                    &frame.body,
                    AX25FrameBody::Supervisory(SupervisoryFrame {
                        code: SupervisoryCode::ReceiveReady,
                        pf: true,
                        ..
                    })
                )
            })
            .collect();
        assert_eq!(polls.len(), 1);
        assert!(polls[0].header.cr, "a poll is a command");

        // The peer coming back ready stops the polling.
        r.sent.borrow_mut().clear();
        crate::testutil::inject(
            &r.device,
            0,
            &command_frame(AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::ReceiveReady,
                nr: 1,
                pf: false,
                modulo128: false,
            })),
        );
        r.reactor.advance(Duration::from_secs(120));
        let polls = sent_frames(&r.sent)
            .iter()
            .filter_map(|frame| frame.redecode(false).ok())
            .filter(|frame| {
                matches!(
                    &frame.body,
                    AX25FrameBody::Supervisory(SupervisoryFrame { pf: true, .. })
                )
            })
            .count();
        assert_eq!(polls, 0);
    }

    #[test]
    fn received_path_learned_for_replies() {
        let r = rig(fast_config());
        let sabm = AX25Frame::new(
            AX25FrameHeader::new(
                addr("VK4MSL-5"),
                addr("VK4BWI"),
                crate::testutil::path("VK4RZB*,VK4RZA*"),
                true,
            ),
            AX25FrameBody::Unnumbered(UnnumberedFrame::SetAsyncBalancedMode { pf: true }),
        );
        crate::testutil::inject(&r.device, 0, &sabm);
        r.reactor.advance(Duration::from_millis(10));
        let frames = sent_frames(&r.sent);
        assert_eq!(frames.len(), 1);
        // The UA retraces the digipeated path in reverse.
        assert_eq!(frames[0].header.repeaters.to_string(), "VK4RZA,VK4RZB");
    }
}
