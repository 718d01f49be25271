/*! The local AX.25 station: owns one peer per remote callsign and
answers unsolicited TEST frames.

A station binds to its interface for frames addressed to its own
callsign+SSID. Inbound TEST commands are answered immediately with a
TEST response carrying the same payload — no connection context is
needed, and no peer is created for them. Everything else is routed to
the peer matching the frame's source address, creating it on first
contact.
*/
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::str::FromStr;

use log::debug;

use crate::address::{AX25Address, AX25Path};
use crate::config::{AX25Version, StationConfig};
use crate::frame::{AX25Frame, AX25FrameBody, AX25FrameHeader, UnnumberedFrame};
use crate::interface::{AX25Interface, ReceiverId};
use crate::peer::{AX25Peer, PeerParams};
use crate::reactor::Reactor;
use crate::signal::Signal;
use crate::{Error, Result};

struct StationInner {
    reactor: Reactor,
    interface: AX25Interface,
    address: AX25Address,
    config: StationConfig,
    peers: HashMap<AX25Address, AX25Peer>,
    receiver: Option<ReceiverId>,
}

/// The station this process operates on the AX.25 network.
#[derive(Clone)]
pub struct AX25Station {
    inner: Rc<RefCell<StationInner>>,
    connection_request: Signal<AX25Peer>,
}

impl AX25Station {
    /// Create a station on `interface`. Call
    /// [`AX25Station::attach`] to start receiving.
    pub fn new(reactor: &Reactor, interface: AX25Interface, config: StationConfig) -> Result<Self> {
        let address = AX25Address::from_str(&config.callsign)?
            .with_ssid(config.ssid)
            .normalised();
        Ok(Self {
            inner: Rc::new(RefCell::new(StationInner {
                reactor: reactor.clone(),
                interface,
                address,
                config,
                peers: HashMap::new(),
                receiver: None,
            })),
            connection_request: Signal::new(),
        })
    }

    /// This station's (normalised) address.
    #[must_use]
    pub fn address(&self) -> AX25Address {
        self.inner.borrow().address.clone()
    }

    /// The protocol revision this station speaks.
    #[must_use]
    pub fn protocol(&self) -> AX25Version {
        self.inner.borrow().config.protocol
    }

    /// Signal fired with the peer whenever an inbound SABM(E) brings
    /// up a connection.
    #[must_use]
    pub fn connection_request(&self) -> Signal<AX25Peer> {
        self.connection_request.clone()
    }

    /// Bind to the interface for frames addressed to this station.
    pub fn attach(&self) -> Result<()> {
        let (interface, callsign, ssid) = {
            let inner = self.inner.borrow();
            if inner.receiver.is_some() {
                return Err(Error::InvalidState("station is already attached".into()));
            }
            (
                inner.interface.clone(),
                inner.address.callsign().to_string(),
                inner.address.ssid(),
            )
        };
        let station = self.clone();
        let receiver = interface.bind(&callsign, Some(ssid), false, move |frame| {
            station.on_receive(frame);
        })?;
        self.inner.borrow_mut().receiver = Some(receiver);
        Ok(())
    }

    /// Stop receiving from the interface.
    pub fn detach(&self) {
        let (interface, receiver) = {
            let mut inner = self.inner.borrow_mut();
            (inner.interface.clone(), inner.receiver.take())
        };
        if let Some(receiver) = receiver {
            interface.unbind(receiver);
        }
    }

    /// The peer context for `remote`, created on first use.
    pub fn peer(&self, remote: &AX25Address) -> AX25Peer {
        self.peer_with_path(remote, AX25Path::empty(), false)
    }

    /// The peer context for `remote`, seeding its digipeater path. A
    /// `locked` path is always used as configured instead of learned.
    pub fn peer_with_path(&self, remote: &AX25Address, path: AX25Path, locked: bool) -> AX25Peer {
        let key = remote.normalised();
        if let Some(existing) = self.inner.borrow().peers.get(&key) {
            return existing.clone();
        }
        let params = {
            let inner = self.inner.borrow();
            let weak = Rc::downgrade(&self.inner);
            PeerParams {
                reactor: inner.reactor.clone(),
                interface: inner.interface.clone(),
                our_address: inner.address.clone(),
                remote: key.clone(),
                config: inner.config.clone(),
                repeaters: path,
                locked_path: locked,
                connection_request: self.connection_request.clone(),
                on_drop: Rc::new(move |address: &AX25Address| {
                    if let Some(inner) = weak.upgrade() {
                        debug!("dropping idle peer {address}");
                        inner.borrow_mut().peers.remove(address);
                    }
                }),
            }
        };
        let peer = AX25Peer::new(params);
        self.inner.borrow_mut().peers.insert(key, peer.clone());
        peer
    }

    /// The peer context for `remote`, if one exists.
    #[must_use]
    pub fn peer_if_known(&self, remote: &AX25Address) -> Option<AX25Peer> {
        self.inner.borrow().peers.get(&remote.normalised()).cloned()
    }

    /// Number of live peer contexts.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.borrow().peers.len()
    }

    fn on_receive(&self, frame: &AX25Frame) {
        if frame.header.cr {
            if let AX25FrameBody::Unnumbered(UnnumberedFrame::Test { payload, .. }) = &frame.body {
                // TEST request: echo without any connection context.
                self.on_receive_test(frame, payload);
                return;
            }
        }
        let peer =
            self.peer_with_path(&frame.header.source, frame.header.repeaters.reply(), false);
        peer.on_receive(frame);
    }

    fn on_receive_test(&self, frame: &AX25Frame, payload: &[u8]) {
        debug!("responding to TEST from {}", frame.header.source);
        let (interface, address) = {
            let inner = self.inner.borrow();
            (inner.interface.clone(), inner.address.clone())
        };
        interface.transmit(AX25Frame::new(
            AX25FrameHeader::new(
                frame.header.source.clone(),
                address,
                frame.header.repeaters.reply(),
                false,
            ),
            AX25FrameBody::Unnumbered(UnnumberedFrame::Test {
                pf: false,
                payload: payload.to_vec(),
            }),
        ));
    }
}
