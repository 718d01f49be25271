//! Helpers shared by the unit tests: a loopback KISS stack and frame
//! builders.
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::address::{AX25Address, AX25Path};
use crate::config::{KissConfig, TransportConfig};
use crate::frame::{AX25Frame, AX25FrameBody, AX25FrameHeader, UnnumberedFrame, pid};
use crate::kiss::{KissCommand, KissDevice, cmd};
use crate::reactor::Reactor;
use crate::transport::LoopbackPipe;

/// A device on a loopback pipe, opened with no TNC preamble and no
/// send pacing. Returns the device and the buffer its writes land in.
pub(crate) fn loopback_device(reactor: &Reactor) -> (KissDevice, Rc<RefCell<Vec<u8>>>) {
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
    sent.borrow_mut().clear();
    (device, sent)
}

/// Split captured pipe bytes into the KISS commands they carry.
pub(crate) fn sent_commands(sent: &Rc<RefCell<Vec<u8>>>) -> Vec<KissCommand> {
    sent.borrow()
        .split(|&b| b == 0xc0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| KissCommand::decode(chunk).unwrap())
        .collect()
}

/// Decode the AX.25 frames out of captured pipe bytes, in order.
pub(crate) fn sent_frames(sent: &Rc<RefCell<Vec<u8>>>) -> Vec<AX25Frame> {
    sent_commands(sent)
        .into_iter()
        .filter(|command| command.cmd == cmd::DATA)
        .map(|command| AX25Frame::decode(&command.payload, None).unwrap())
        .collect()
}

/// Feed a frame into the device as though the TNC received it on the
/// given port.
pub(crate) fn inject(device: &KissDevice, port: u8, frame: &AX25Frame) {
    let mut raw = vec![0xc0];
    raw.extend(KissCommand::data(port, frame.encode()).encode());
    raw.push(0xc0);
    device.receive_bytes(&raw);
}

pub(crate) fn addr(s: &str) -> AX25Address {
    s.parse().unwrap()
}

pub(crate) fn path(s: &str) -> AX25Path {
    AX25Path::parse(s).unwrap()
}

/// A UI frame with the APRS PID.
pub(crate) fn ui(dest: &str, src: &str, repeaters: &str, payload: &[u8]) -> AX25Frame {
    AX25Frame::new(
        AX25FrameHeader::new(addr(dest), addr(src), path(repeaters), true),
        AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedInformation {
            pf: false,
            pid: pid::NO_L3,
            payload: payload.to_vec(),
        }),
    )
}
