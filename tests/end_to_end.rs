//! End-to-end exercises of the stack: KISS framing up through
//! connected-mode transfer and APRS messaging, all on loopback pipes
//! with virtual time.
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;

use ax25link::address::{AX25Address, AX25Path};
use ax25link::aprs::{AprsData, AprsDigipeater, AprsInterface, AprsMessage, MessageState, ReplyAck};
use ax25link::config::{AprsConfig, KissConfig, StationConfig, TransportConfig};
use ax25link::frame::{
    AX25Frame, AX25FrameBody, AX25FrameHeader, InformationFrame, UnnumberedFrame, pid,
};
use ax25link::interface::AX25Interface;
use ax25link::kiss::{KissCommand, KissDevice, cmd};
use ax25link::peer::{AX25PeerState, RequestOutcome};
use ax25link::reactor::Reactor;
use ax25link::station::AX25Station;
use ax25link::transport::LoopbackPipe;

struct Stack {
    device: KissDevice,
    sent: Rc<RefCell<Vec<u8>>>,
    iface: AX25Interface,
}

fn stack(reactor: &Reactor) -> Stack {
    let mut config = KissConfig::new(TransportConfig::Tcp {
        host: "loopback".into(),
        port: 0,
    });
    config.kiss_commands = Vec::new();
    config.send_block_delay = Duration::ZERO;
    config.send_block_size = 64 * 1024;
    let device = KissDevice::new(reactor, config);
    let (pipe, sent) = LoopbackPipe::new();
    device.open_with_pipe(Box::new(pipe)).unwrap();
    reactor.run_pending();
    let iface = AX25Interface::with_cts(
        reactor,
        device.port(0),
        Duration::from_millis(1),
        Duration::ZERO,
    );
    Stack {
        device,
        sent,
        iface,
    }
}

fn sent_frames(sent: &Rc<RefCell<Vec<u8>>>) -> Vec<AX25Frame> {
    sent.borrow()
        .split(|&b| b == 0xc0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| KissCommand::decode(chunk).unwrap())
        .filter(|command| command.cmd == cmd::DATA)
        .map(|command| AX25Frame::decode(&command.payload, None).unwrap())
        .collect()
}

fn inject(device: &KissDevice, frame: &AX25Frame) {
    let mut raw = vec![0xc0];
    raw.extend(KissCommand::data(0, frame.encode()).encode());
    raw.push(0xc0);
    device.receive_bytes(&raw);
}

fn addr(s: &str) -> AX25Address {
    s.parse().unwrap()
}

#[test]
fn ui_frame_wire_format() -> Result<()> {
    let frame = AX25Frame::new(
        AX25FrameHeader::new(addr("VK4BWI"), addr("VK4MSL"), AX25Path::empty(), true),
        AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedInformation {
            pf: false,
            pid: pid::NO_L3,
            payload: b"This is a test".to_vec(),
        }),
    );
    let raw = frame.encode();
    assert_eq!(
        &raw[0..7],
        &[0xac, 0x96, 0x68, 0x84, 0xae, 0x92, 0xe0],
        "destination bytes"
    );
    assert_eq!(&raw[14..16], &[0x03, 0xf0], "control and PID");
    assert!(raw.ends_with(b"This is a test"));
    Ok(())
}

#[test]
fn iframe_wire_decode() -> Result<()> {
    let mut raw = vec![
        0xac, 0x96, 0x68, 0x84, 0xae, 0x92, 0xe0, //
        0xac, 0x96, 0x68, 0x9a, 0xa6, 0x98, 0x61, //
        0xd4, 0xff,
    ];
    raw.extend_from_slice(b"This is a test");
    let frame = AX25Frame::decode(&raw, Some(false))?;
    let AX25FrameBody::Information(i) = &frame.body else {
        panic!("expected an I frame");
    };
    assert_eq!((i.nr, i.ns, i.pf), (6, 2, true));
    assert_eq!(i.pid, 0xff);
    assert_eq!(i.payload, b"This is a test");
    Ok(())
}

#[test]
fn station_answers_test_frame_through_the_stack() -> Result<()> {
    let reactor = Reactor::new();
    let s = stack(&reactor);
    let station = AX25Station::new(&reactor, s.iface.clone(), StationConfig::new("VK4MSL", 5))?;
    station.attach()?;

    inject(
        &s.device,
        &AX25Frame::new(
            AX25FrameHeader::new(addr("VK4MSL-5"), addr("VK4BWI"), AX25Path::empty(), true),
            AX25FrameBody::Unnumbered(UnnumberedFrame::Test {
                pf: true,
                payload: b"123456789".to_vec(),
            }),
        ),
    );
    reactor.advance(Duration::from_millis(10));

    let frames = sent_frames(&s.sent);
    assert_eq!(frames.len(), 1);
    let reply = &frames[0];
    assert_eq!(reply.header.destination, addr("VK4BWI").with_ch(false));
    assert!(!reply.header.cr, "TEST response must have C=0");
    assert!(matches!(
        &reply.body,
        AX25FrameBody::Unnumbered(UnnumberedFrame::Test { payload, .. })
            if payload == b"123456789"
    ));
    assert_eq!(station.peer_count(), 0, "no peer for unsolicited TEST");
    Ok(())
}

#[test]
fn aprs_message_confirmed_end_to_end() -> Result<()> {
    let reactor = Reactor::new();
    let s = stack(&reactor);
    let aprs = AprsInterface::new(
        &reactor,
        s.iface.clone(),
        &addr("VK4MSL-10"),
        AprsConfig::default(),
    )?;

    let states = Rc::new(RefCell::new(Vec::new()));
    let handle = aprs
        .send_message(&addr("VK4MDL-7"), "Hi", None, false, ReplyAck::None)?
        .expect("confirmable mode returns a handle");
    {
        let states = Rc::clone(&states);
        handle.done().connect(move |state: &MessageState| {
            states.borrow_mut().push(*state);
        });
    }
    reactor.advance(Duration::from_millis(10));

    let frames = sent_frames(&s.sent);
    assert_eq!(frames.len(), 1);
    let Some(AprsData::Message(sent_msg)) = AprsData::decode(&frames[0]) else {
        panic!("expected a message frame");
    };
    assert_eq!(sent_msg.msgid(), Some("1"));
    let AprsMessage::Data { message, .. } = &sent_msg else {
        panic!("expected a data message");
    };
    assert_eq!(message, "Hi");
    assert_eq!(handle.state(), MessageState::Send);
    assert_eq!(aprs.pending_messages(), 1);

    // The addressee acknowledges.
    inject(
        &s.device,
        &AX25Frame::new(
            AX25FrameHeader::new(addr("VK4MSL-10"), addr("VK4MDL-7"), AX25Path::empty(), true),
            AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedInformation {
                pf: false,
                pid: pid::NO_L3,
                payload: b":VK4MSL-10:ack1".to_vec(),
            }),
        ),
    );
    reactor.advance(Duration::from_millis(10));
    assert_eq!(handle.state(), MessageState::Success);
    assert_eq!(*states.borrow(), vec![MessageState::Success]);
    assert_eq!(aprs.pending_messages(), 0);
    Ok(())
}

#[test]
fn widen_digipeat_end_to_end() -> Result<()> {
    let reactor = Reactor::new();
    let s = stack(&reactor);
    let aprs = AprsInterface::new(
        &reactor,
        s.iface.clone(),
        &addr("VK4MSL-10"),
        AprsConfig::default(),
    )?;
    let _digi = AprsDigipeater::new(&aprs, [addr("WIDE1-1"), addr("WIDE2-1")]);

    inject(
        &s.device,
        &AX25Frame::new(
            AX25FrameHeader::new(
                addr("CQ"),
                addr("VK4BWI"),
                AX25Path::parse("WIDE3-3")?,
                true,
            ),
            AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedInformation {
                pf: false,
                pid: pid::NO_L3,
                payload: b">station test".to_vec(),
            }),
        ),
    );
    reactor.advance(Duration::from_millis(10));

    let frames = sent_frames(&s.sent);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.repeaters.to_string(), "VK4MSL-10*,WIDE3-2");
    assert_eq!(frames[0].header.source, addr("VK4BWI").with_ch(false));
    Ok(())
}

// Two full stacks wired back to back: every byte one writes, the
// other reads.
fn shuttle(reactor: &Reactor, a: &Stack, b: &Stack, rounds: usize, step: Duration) {
    for _ in 0..rounds {
        reactor.advance(step);
        let from_a: Vec<u8> = a.sent.borrow_mut().drain(..).collect();
        if !from_a.is_empty() {
            b.device.receive_bytes(&from_a);
        }
        let from_b: Vec<u8> = b.sent.borrow_mut().drain(..).collect();
        if !from_b.is_empty() {
            a.device.receive_bytes(&from_b);
        }
    }
}

#[test]
fn two_stations_negotiate_connect_and_transfer() -> Result<()> {
    let reactor = Reactor::new();
    let a = stack(&reactor);
    let b = stack(&reactor);

    let mut config_a = StationConfig::new("VK4MSL", 5);
    config_a.rr_delay = Duration::from_millis(200);
    let station_a = AX25Station::new(&reactor, a.iface.clone(), config_a)?;
    station_a.attach()?;

    let mut config_b = StationConfig::new("VK4BWI", 2);
    config_b.max_ifield = 128;
    config_b.max_outstanding_mod128 = 4;
    config_b.ack_timeout = Duration::from_secs(10);
    config_b.max_retries = 20;
    config_b.rr_delay = Duration::from_millis(200);
    let station_b = AX25Station::new(&reactor, b.iface.clone(), config_b)?;
    station_b.attach()?;

    let accepted = Rc::new(RefCell::new(Vec::new()));
    {
        let accepted = Rc::clone(&accepted);
        station_b
            .connection_request()
            .connect(move |peer: &ax25link::peer::AX25Peer| {
                accepted.borrow_mut().push(peer.address());
            });
    }

    // A connects to B: XID negotiation, then SABME (both ends are
    // 2.2 and advertise modulo 128), then UA.
    let peer_a = station_a.peer(&addr("VK4BWI-2"));
    let outcome = Rc::new(RefCell::new(Vec::new()));
    {
        let outcome = Rc::clone(&outcome);
        peer_a
            .connect()
            .done()
            .connect(move |o: &RequestOutcome| outcome.borrow_mut().push(*o));
    }
    shuttle(&reactor, &a, &b, 10, Duration::from_millis(20));

    assert_eq!(*outcome.borrow(), vec![RequestOutcome::Established]);
    assert_eq!(peer_a.state(), AX25PeerState::Connected);
    assert!(peer_a.modulo128(), "both ends advertise modulo 128");
    assert_eq!(*accepted.borrow(), vec![addr("VK4MSL-5")]);
    let peer_b = station_b.peer_if_known(&addr("VK4MSL-5")).unwrap();
    assert_eq!(peer_b.state(), AX25PeerState::Connected);

    // Data flows A to B and is acknowledged.
    let heard = Rc::new(RefCell::new(Vec::new()));
    {
        let heard = Rc::clone(&heard);
        peer_b
            .received_information()
            .connect(move |i: &InformationFrame| {
                heard.borrow_mut().push(i.payload.clone());
            });
    }
    peer_a.send(pid::NO_L3, b"The quick brown fox");
    shuttle(&reactor, &a, &b, 20, Duration::from_millis(50));

    assert_eq!(*heard.borrow(), vec![b"The quick brown fox".to_vec()]);
    Ok(())
}

#[test]
fn disconnect_end_to_end() -> Result<()> {
    let reactor = Reactor::new();
    let a = stack(&reactor);
    let b = stack(&reactor);
    let station_a = AX25Station::new(&reactor, a.iface.clone(), StationConfig::new("VK4MSL", 5))?;
    station_a.attach()?;
    let station_b = AX25Station::new(&reactor, b.iface.clone(), StationConfig::new("VK4BWI", 2))?;
    station_b.attach()?;

    let peer_a = station_a.peer(&addr("VK4BWI-2"));
    let _connect = peer_a.connect();
    shuttle(&reactor, &a, &b, 10, Duration::from_millis(20));
    assert_eq!(peer_a.state(), AX25PeerState::Connected);

    let outcome = Rc::new(RefCell::new(Vec::new()));
    {
        let outcome = Rc::clone(&outcome);
        peer_a
            .disconnect()
            .done()
            .connect(move |o: &RequestOutcome| outcome.borrow_mut().push(*o));
    }
    shuttle(&reactor, &a, &b, 10, Duration::from_millis(20));
    assert_eq!(*outcome.borrow(), vec![RequestOutcome::Disconnected]);
    assert_eq!(peer_a.state(), AX25PeerState::Disconnected);
    let peer_b = station_b.peer_if_known(&addr("VK4MSL-5")).unwrap();
    assert_eq!(peer_b.state(), AX25PeerState::Disconnected);
    Ok(())
}
