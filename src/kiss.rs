/*! KISS framing and TNC device handling.

[KISS][kiss] wraps each frame between `FEND` (0xC0) bytes, escaping any
`FEND` or `FESC` inside the frame. The first unstuffed byte of a frame
is `(port << 4) | command`: one physical TNC can multiplex up to 16
logical ports, and command 0 carries AX.25 frame data.

A [`KissDevice`] owns one byte pipe (serial, subprocess, or TCP — see
[`crate::transport`]) and hands out [`KissPort`] handles. Opening the
device runs the configurable TNC-mode command sequence (`INT KISS`,
`RESET` by default) that switches a TNC2-style controller into KISS
mode; closing it sends return-from-KISS and drains the send buffer
before releasing the pipe.

[kiss]: https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)
*/
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::KissConfig;
use crate::reactor::{IoEvent, Reactor, SourceId};
use crate::signal::Signal;
use crate::transport::{self, BytePipe};
use crate::{Error, Result};

const KISS_FEND: u8 = 0xC0;
const KISS_FESC: u8 = 0xDB;
const KISS_TFEND: u8 = 0xDC;
const KISS_TFESC: u8 = 0xDD;

/// KISS command numbers (low nibble of the first frame byte).
pub mod cmd {
    /// AX.25 frame data.
    pub const DATA: u8 = 0x00;
    /// Transmitter keyup delay, 10 ms units.
    pub const TXDELAY: u8 = 0x01;
    /// Persistence parameter.
    pub const P: u8 = 0x02;
    /// Slot interval, 10 ms units.
    pub const SLOTTIME: u8 = 0x03;
    /// Time to keep transmitting after the frame, 10 ms units.
    pub const TXTAIL: u8 = 0x04;
    /// Full-duplex flag.
    pub const FDUPLEX: u8 = 0x05;
    /// Hardware specific.
    pub const SETHW: u8 = 0x06;
    /// Leave KISS mode (sent with port 15).
    pub const RETURN: u8 = 0x0F;
}

// Growth bound for the receive buffer, in case the far end streams
// garbage without ever sending a FEND.
const MAX_RX_BUFFER: usize = 64 * 1024;

// Pacing of the TNC-mode command strings sent while opening.
const OPEN_BYTE_DELAY: Duration = Duration::from_millis(100);
const OPEN_COMMAND_SETTLE: Duration = Duration::from_millis(500);

/// Escape a byte sequence for KISS transmission.
///
/// <https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)>
#[must_use]
fn stuff(bytes: &[u8]) -> Vec<u8> {
    // Add 10% capacity to leave room for escaped bytes.
    let mut ret = Vec::with_capacity((3 + bytes.len()) * 110 / 100);
    for &b in bytes {
        match b {
            KISS_FEND => ret.extend([KISS_FESC, KISS_TFEND]),
            KISS_FESC => ret.extend([KISS_FESC, KISS_TFESC]),
            b => ret.push(b),
        }
    }
    ret
}

/// Reverse [`stuff`]. Unknown escapes are passed through untouched; a
/// trailing lone escape byte is dropped.
#[must_use]
fn unstuff(bytes: &[u8]) -> Vec<u8> {
    let mut ret = Vec::with_capacity(bytes.len());
    let mut escaped = false;
    for &b in bytes {
        if escaped {
            match b {
                KISS_TFEND => ret.push(KISS_FEND),
                KISS_TFESC => ret.push(KISS_FESC),
                KISS_FESC => {
                    // Not a valid escape; emit the first FESC and stay
                    // escaped for the next byte.
                    ret.push(KISS_FESC);
                    continue;
                }
                other => ret.extend([KISS_FESC, other]),
            }
            escaped = false;
        } else if b == KISS_FESC {
            escaped = true;
        } else {
            ret.push(b);
        }
    }
    ret
}

/// One KISS frame: port, command, and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KissCommand {
    /// Logical TNC port, 0–15.
    pub port: u8,
    /// Command number, 0–15.
    pub cmd: u8,
    /// Command payload.
    pub payload: Vec<u8>,
}

impl KissCommand {
    /// A data frame for the given port.
    pub fn data(port: u8, payload: Vec<u8>) -> Self {
        Self {
            port,
            cmd: cmd::DATA,
            payload,
        }
    }

    /// The return-from-KISS command.
    pub fn return_from_kiss() -> Self {
        Self {
            port: 15,
            cmd: cmd::RETURN,
            payload: Vec::new(),
        }
    }

    /// Decode the stuffed bytes found between two FENDs.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let frame = unstuff(frame);
        let (&first, payload) = frame
            .split_first()
            .ok_or(Error::Truncated("empty KISS frame"))?;
        Ok(Self {
            port: first >> 4,
            cmd: first & 0x0f,
            payload: payload.to_vec(),
        })
    }

    /// Encode to stuffed bytes, without the surrounding FENDs.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![((self.port & 0x0f) << 4) | (self.cmd & 0x0f)];
        raw.extend_from_slice(&self.payload);
        stuff(&raw)
    }
}

/// Life cycle of a KISS device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KissDeviceState {
    /// Byte pipe not open.
    Closed,
    /// Pipe just opened; the TNC-mode command sequence is running.
    Opening,
    /// Pipe open, TNC in KISS mode.
    Open,
    /// Close requested; draining the send buffer.
    Closing,
}

struct DeviceInner {
    reactor: Reactor,
    config: KissConfig,
    state: KissDeviceState,
    pipe: Option<Box<dyn BytePipe>>,
    source: Option<SourceId>,
    rx_buffer: Vec<u8>,
    tx_buffer: Vec<u8>,
    send_scheduled: bool,
    ports: HashMap<u8, KissPort>,
    // Remaining TNC-mode commands, then bytes of the one in flight.
    open_commands: VecDeque<Vec<u8>>,
    open_bytes: VecDeque<u8>,
}

/// A KISS TNC attached to one byte pipe, multiplexing up to 16 ports.
#[derive(Clone)]
pub struct KissDevice {
    inner: Rc<RefCell<DeviceInner>>,
}

impl KissDevice {
    /// Create a device. Nothing touches the transport until
    /// [`KissDevice::open`].
    pub fn new(reactor: &Reactor, config: KissConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeviceInner {
                reactor: reactor.clone(),
                config,
                state: KissDeviceState::Closed,
                pipe: None,
                source: None,
                rx_buffer: Vec::new(),
                tx_buffer: Vec::new(),
                send_scheduled: false,
                ports: HashMap::new(),
                open_commands: VecDeque::new(),
                open_bytes: VecDeque::new(),
            })),
        }
    }

    /// Current device state.
    #[must_use]
    pub fn state(&self) -> KissDeviceState {
        self.inner.borrow().state
    }

    /// Open the transport named in the configuration and run the
    /// TNC-mode command sequence.
    pub fn open(&self) -> Result<()> {
        let (reactor, config) = {
            let inner = self.inner.borrow();
            if inner.state != KissDeviceState::Closed {
                return Err(Error::InvalidState("device is not closed".into()));
            }
            (inner.reactor.clone(), inner.config.transport.clone())
        };
        let weak = Rc::downgrade(&self.inner);
        let source = reactor.register_source(move |event| {
            if let Some(inner) = weak.upgrade() {
                on_io_event(&inner, event);
            }
        });
        let pipe = match transport::open(&config, reactor.io_sender(), source) {
            Ok(pipe) => pipe,
            Err(e) => {
                reactor.unregister_source(source);
                return Err(e);
            }
        };
        self.inner.borrow_mut().source = Some(source);
        self.open_with_pipe(pipe)
    }

    /// Open on an already-constructed byte pipe (a custom transport,
    /// or a [`crate::transport::LoopbackPipe`] in tests).
    pub fn open_with_pipe(&self, pipe: Box<dyn BytePipe>) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != KissDeviceState::Closed {
                return Err(Error::InvalidState("device is not closed".into()));
            }
            debug!("opening KISS device");
            inner.state = KissDeviceState::Opening;
            inner.pipe = Some(pipe);
            inner.open_commands = inner
                .config
                .kiss_commands
                .iter()
                .map(|command| command.as_bytes().to_vec())
                .collect();
        }
        let inner = Rc::clone(&self.inner);
        let reactor = self.inner.borrow().reactor.clone();
        reactor.call_soon(move || next_open_command(&inner));
        Ok(())
    }

    /// Ask the device to close: send return-from-KISS (when configured
    /// to), drain the send buffer, then release the pipe.
    pub fn close(&self) -> Result<()> {
        let reset = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != KissDeviceState::Open {
                return Err(Error::InvalidState("device is not open".into()));
            }
            debug!("closing KISS device");
            inner.state = KissDeviceState::Closing;
            inner.config.reset_on_close
        };
        if reset {
            send_command(&self.inner, KissCommand::return_from_kiss());
        } else {
            finish_close(&self.inner);
        }
        Ok(())
    }

    /// The port handle for logical port `port`, created on first use.
    pub fn port(&self, port: u8) -> KissPort {
        let mut inner = self.inner.borrow_mut();
        if let Some(existing) = inner.ports.get(&port) {
            return existing.clone();
        }
        debug!("opening new KISS port {port}");
        let handle = KissPort {
            inner: Rc::new(PortInner {
                device: Rc::downgrade(&self.inner),
                port,
                received: Signal::new(),
            }),
        };
        inner.ports.insert(port, handle.clone());
        handle
    }

    /// Feed bytes as though they were read from the transport. The
    /// real transports deliver through the reactor; this entry point
    /// serves loopback pipes and tests.
    pub fn receive_bytes(&self, data: &[u8]) {
        receive(&self.inner, data);
    }
}

/// One logical port of a KISS device.
#[derive(Clone)]
pub struct KissPort {
    inner: Rc<PortInner>,
}

struct PortInner {
    device: Weak<RefCell<DeviceInner>>,
    port: u8,
    received: Signal<Vec<u8>>,
}

impl KissPort {
    /// The port number.
    #[must_use]
    pub fn port(&self) -> u8 {
        self.inner.port
    }

    /// Signal carrying the raw AX.25 bytes of each received data frame.
    #[must_use]
    pub fn received(&self) -> &Signal<Vec<u8>> {
        &self.inner.received
    }

    /// Send raw AX.25 frame bytes out this port.
    pub fn send(&self, frame: &[u8]) {
        debug!("XMIT port {}: {} bytes", self.inner.port, frame.len());
        if let Some(device) = self.inner.device.upgrade() {
            send_command(&device, KissCommand::data(self.inner.port, frame.to_vec()));
        } else {
            warn!("send on port {} of a dropped device", self.inner.port);
        }
    }

    fn deliver(&self, command: KissCommand) {
        if command.cmd != cmd::DATA {
            // The TNC is not supposed to send anything else.
            debug!(
                "ignoring non-data KISS command 0x{:02x} on port {}",
                command.cmd, self.inner.port
            );
            return;
        }
        self.inner.received.emit(&command.payload);
    }
}

fn on_io_event(inner: &Rc<RefCell<DeviceInner>>, event: IoEvent) {
    match event {
        IoEvent::Data(data) => receive(inner, &data),
        IoEvent::Closed => {
            error!("KISS transport reached EOF");
            finish_close(inner);
        }
        IoEvent::Error(e) => {
            error!("KISS transport failed: {e}");
            finish_close(inner);
        }
    }
}

fn receive(inner: &Rc<RefCell<DeviceInner>>, data: &[u8]) {
    {
        let mut dev = inner.borrow_mut();
        match dev.state {
            KissDeviceState::Closed => return,
            KissDeviceState::Opening => {
                // TNC2-mode prompt chatter; nothing to parse yet.
                debug!("RECV while opening: {} bytes discarded", data.len());
                return;
            }
            KissDeviceState::Open | KissDeviceState::Closing => {}
        }
        dev.rx_buffer.extend_from_slice(data);
        if dev.rx_buffer.len() > MAX_RX_BUFFER {
            warn!(
                "receive buffer exceeded {MAX_RX_BUFFER} bytes without a \
                 complete frame; discarding"
            );
            dev.rx_buffer.clear();
            return;
        }
    }
    while let Some(command) = next_frame(inner) {
        dispatch(inner, command);
    }
}

// Extract the next complete KISS frame from the receive buffer.
fn next_frame(inner: &Rc<RefCell<DeviceInner>>) -> Option<KissCommand> {
    let mut dev = inner.borrow_mut();
    loop {
        let Some(start) = dev.rx_buffer.iter().position(|&b| b == KISS_FEND) else {
            // No frame boundary at all; everything is junk.
            dev.rx_buffer.clear();
            return None;
        };
        if start > 0 {
            debug!("discarding {start} junk bytes before frame start");
            dev.rx_buffer.drain(..start);
        }
        let end = dev.rx_buffer[1..]
            .iter()
            .position(|&b| b == KISS_FEND)
            .map(|i| i + 1)?; // Frame incomplete; wait for more bytes.
        // The trailing FEND stays behind as the next frame's opener.
        let frame: Vec<u8> = dev.rx_buffer.drain(..end).skip(1).collect();
        if frame.is_empty() {
            // Adjacent FENDs.
            continue;
        }
        match KissCommand::decode(&frame) {
            Ok(command) => return Some(command),
            Err(e) => debug!("undecodable KISS frame: {e}"),
        }
    }
}

fn dispatch(inner: &Rc<RefCell<DeviceInner>>, command: KissCommand) {
    let port = inner.borrow().ports.get(&command.port).cloned();
    match port {
        Some(port) => {
            debug!("RECV frame for port {}", command.port);
            port.deliver(command);
        }
        None => debug!("dropping frame for unbound port {}", command.port),
    }
}

fn send_command(inner: &Rc<RefCell<DeviceInner>>, command: KissCommand) {
    let mut dev = inner.borrow_mut();
    let raw = command.encode();
    // Elide the opening FEND when the previous frame's trailing FEND
    // is still in the buffer.
    if !dev.tx_buffer.ends_with(&[KISS_FEND]) {
        dev.tx_buffer.push(KISS_FEND);
    }
    dev.tx_buffer.extend_from_slice(&raw);
    dev.tx_buffer.push(KISS_FEND);
    if !dev.send_scheduled {
        dev.send_scheduled = true;
        let weak = Rc::downgrade(inner);
        dev.reactor.call_soon(move || {
            if let Some(inner) = weak.upgrade() {
                send_block(&inner);
            }
        });
    }
}

// Write the next block of the send buffer to the pipe, pacing blocks
// by the configured delay.
fn send_block(inner: &Rc<RefCell<DeviceInner>>) {
    let closing = {
        let mut dev = inner.borrow_mut();
        dev.send_scheduled = false;
        if dev.pipe.is_none() {
            dev.tx_buffer.clear();
            return;
        }
        let n = dev.config.send_block_size.min(dev.tx_buffer.len());
        let block: Vec<u8> = dev.tx_buffer.drain(..n).collect();
        if let (false, Some(pipe)) = (block.is_empty(), dev.pipe.as_mut()) {
            // A send failure is logged and the scheduler carries on;
            // the next block write will try again.
            if let Err(e) = pipe.send_raw(&block) {
                error!("failed to write to KISS transport: {e}");
            }
        }
        if !dev.tx_buffer.is_empty() {
            dev.send_scheduled = true;
            let weak = Rc::downgrade(inner);
            let delay = dev.config.send_block_delay;
            dev.reactor.call_later(delay, move || {
                if let Some(inner) = weak.upgrade() {
                    send_block(&inner);
                }
            });
            false
        } else {
            dev.state == KissDeviceState::Closing
        }
    };
    if closing {
        finish_close(inner);
    }
}

// Send the next TNC-mode setup command, or declare the device open.
fn next_open_command(inner: &Rc<RefCell<DeviceInner>>) {
    let mut dev = inner.borrow_mut();
    if dev.state != KissDeviceState::Opening {
        return;
    }
    match dev.open_commands.pop_front() {
        Some(command) => {
            debug!("sending TNC setup command {:?}", String::from_utf8_lossy(&command));
            dev.open_bytes = command.into_iter().collect();
            dev.open_bytes.push_back(b'\r');
            dev.rx_buffer.clear();
            let weak = Rc::downgrade(inner);
            dev.reactor.call_soon(move || {
                if let Some(inner) = weak.upgrade() {
                    next_open_byte(&inner);
                }
            });
        }
        None => {
            info!("KISS device is open");
            dev.state = KissDeviceState::Open;
            dev.rx_buffer.clear();
        }
    }
}

// TNC2-mode controllers need their setup bytes trickled out.
fn next_open_byte(inner: &Rc<RefCell<DeviceInner>>) {
    let mut dev = inner.borrow_mut();
    if dev.state != KissDeviceState::Opening || dev.pipe.is_none() {
        return;
    }
    match dev.open_bytes.pop_front() {
        Some(byte) => {
            if let Some(Err(e)) = dev.pipe.as_mut().map(|pipe| pipe.send_raw(&[byte])) {
                error!("failed to write TNC setup byte: {e}");
            }
            let weak = Rc::downgrade(inner);
            dev.reactor.call_later(OPEN_BYTE_DELAY, move || {
                if let Some(inner) = weak.upgrade() {
                    next_open_byte(&inner);
                }
            });
        }
        None => {
            let weak = Rc::downgrade(inner);
            dev.reactor.call_later(OPEN_COMMAND_SETTLE, move || {
                if let Some(inner) = weak.upgrade() {
                    next_open_command(&inner);
                }
            });
        }
    }
}

fn finish_close(inner: &Rc<RefCell<DeviceInner>>) {
    let mut dev = inner.borrow_mut();
    if let Some(mut pipe) = dev.pipe.take() {
        if let Err(e) = pipe.shutdown() {
            warn!("error shutting down KISS transport: {e}");
        }
    }
    if let Some(source) = dev.source.take() {
        dev.reactor.unregister_source(source);
    }
    dev.state = KissDeviceState::Closed;
    dev.tx_buffer.clear();
    dev.rx_buffer.clear();
    info!("KISS device closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackPipe;

    fn instant_config() -> KissConfig {
        use crate::config::TransportConfig;
        let mut config = KissConfig::new(TransportConfig::Tcp {
            host: "unused".into(),
            port: 0,
        });
        // No TNC-mode preamble, no pacing: frames hit the pipe at once.
        config.kiss_commands = Vec::new();
        config.send_block_delay = Duration::ZERO;
        config.send_block_size = 1024;
        config
    }

    fn open_device(reactor: &Reactor, config: KissConfig) -> (KissDevice, Rc<RefCell<Vec<u8>>>) {
        let device = KissDevice::new(reactor, config);
        let (pipe, sent) = LoopbackPipe::new();
        device.open_with_pipe(Box::new(pipe)).unwrap();
        reactor.run_pending();
        (device, sent)
    }

    #[test]
    fn stuff_roundtrip() {
        for payload in [
            b"hello".to_vec(),
            vec![KISS_FEND, KISS_FESC, 0x00, KISS_TFEND, KISS_TFESC],
            Vec::new(),
            vec![KISS_FESC, KISS_FEND, KISS_FESC],
        ] {
            assert_eq!(unstuff(&stuff(&payload)), payload, "payload {payload:02x?}");
        }
    }

    #[test]
    fn stuff_escapes() {
        assert_eq!(
            stuff(&[1, KISS_FEND, 2, KISS_FESC, 3]),
            vec![1, KISS_FESC, KISS_TFEND, 2, KISS_FESC, KISS_TFESC, 3]
        );
    }

    #[test]
    fn command_codec() -> Result<()> {
        let command = KissCommand::data(2, vec![0xc0, 0x12]);
        let raw = command.encode();
        assert_eq!(raw, vec![0x20, KISS_FESC, KISS_TFEND, 0x12]);
        assert_eq!(KissCommand::decode(&raw)?, command);

        let ret = KissCommand::return_from_kiss();
        assert_eq!(ret.encode(), vec![0xff]);
        Ok(())
    }

    #[test]
    fn open_runs_command_sequence() {
        let reactor = Reactor::new();
        let mut config = instant_config();
        config.kiss_commands = vec!["INT KISS".into(), "RESET".into()];
        let device = KissDevice::new(&reactor, config);
        let (pipe, sent) = LoopbackPipe::new();
        device.open_with_pipe(Box::new(pipe)).unwrap();
        assert_eq!(device.state(), KissDeviceState::Opening);
        // Pacing: 100 ms per byte plus 500 ms settle per command.
        reactor.advance(Duration::from_secs(5));
        assert_eq!(device.state(), KissDeviceState::Open);
        assert_eq!(&*sent.borrow(), b"INT KISS\rRESET\r");
    }

    #[test]
    fn port_send_wraps_in_fends() {
        let reactor = Reactor::new();
        let (device, sent) = open_device(&reactor, instant_config());
        assert_eq!(device.state(), KissDeviceState::Open);
        device.port(0).send(b"abc");
        reactor.run_pending();
        assert_eq!(&*sent.borrow(), &[KISS_FEND, 0x00, b'a', b'b', b'c', KISS_FEND]);
    }

    #[test]
    fn back_to_back_frames_share_a_fend() {
        let reactor = Reactor::new();
        let (device, sent) = open_device(&reactor, instant_config());
        let port = device.port(0);
        port.send(b"a");
        port.send(b"b");
        reactor.run_pending();
        assert_eq!(
            &*sent.borrow(),
            &[KISS_FEND, 0x00, b'a', KISS_FEND, 0x00, b'b', KISS_FEND]
        );
    }

    #[test]
    fn send_respects_block_size_and_delay() {
        let reactor = Reactor::new();
        let mut config = instant_config();
        config.send_block_size = 4;
        config.send_block_delay = Duration::from_millis(100);
        let (device, sent) = open_device(&reactor, config);
        device.port(0).send(b"abcdef");
        reactor.run_pending();
        assert_eq!(sent.borrow().len(), 4);
        reactor.advance(Duration::from_millis(100));
        assert_eq!(sent.borrow().len(), 8);
        reactor.advance(Duration::from_millis(100));
        assert_eq!(&*sent.borrow(), &[KISS_FEND, 0x00, b'a', b'b', b'c', b'd', b'e', b'f', KISS_FEND]);
    }

    #[test]
    fn receive_dispatches_to_bound_port() {
        let reactor = Reactor::new();
        let (device, _sent) = open_device(&reactor, instant_config());
        let got = Rc::new(RefCell::new(Vec::new()));
        {
            let got = Rc::clone(&got);
            device.port(0).received().connect(move |payload: &Vec<u8>| {
                got.borrow_mut().push(payload.clone());
            });
        }
        // Garbage, then two frames (one split across deliveries), an
        // empty frame, and a frame for an unbound port.
        device.receive_bytes(&[0x55, 0xaa, KISS_FEND, 0x00, 1, 2]);
        assert!(got.borrow().is_empty());
        device.receive_bytes(&[3, KISS_FEND, KISS_FEND, 0x00, 4, KISS_FEND]);
        device.receive_bytes(&[0x10, 5, KISS_FEND]);
        assert_eq!(*got.borrow(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn receive_unstuffs() {
        let reactor = Reactor::new();
        let (device, _sent) = open_device(&reactor, instant_config());
        let got = Rc::new(RefCell::new(Vec::new()));
        {
            let got = Rc::clone(&got);
            device.port(0).received().connect(move |payload: &Vec<u8>| {
                got.borrow_mut().push(payload.clone());
            });
        }
        device.receive_bytes(&[
            KISS_FEND, 0x00, KISS_FESC, KISS_TFEND, KISS_FESC, KISS_TFESC, 7, KISS_FEND,
        ]);
        assert_eq!(*got.borrow(), vec![vec![KISS_FEND, KISS_FESC, 7]]);
    }

    #[test]
    fn panicking_port_handler_does_not_stall_receive() {
        let reactor = Reactor::new();
        let (device, _sent) = open_device(&reactor, instant_config());
        let got = Rc::new(RefCell::new(0));
        device.port(0).received().connect(|_: &Vec<u8>| panic!("bad handler"));
        {
            let got = Rc::clone(&got);
            device.port(0).received().connect(move |_: &Vec<u8>| *got.borrow_mut() += 1);
        }
        device.receive_bytes(&[KISS_FEND, 0x00, 1, KISS_FEND, 0x00, 2, KISS_FEND]);
        assert_eq!(*got.borrow(), 2);
    }

    #[test]
    fn close_sends_return_and_drains() {
        let reactor = Reactor::new();
        let mut config = instant_config();
        config.reset_on_close = true;
        let (device, sent) = open_device(&reactor, config);
        device.close().unwrap();
        reactor.run_pending();
        assert_eq!(device.state(), KissDeviceState::Closed);
        assert_eq!(&*sent.borrow(), &[KISS_FEND, 0xff, KISS_FEND]);
        // A closed device refuses to close again.
        assert!(device.close().is_err());
    }

    #[test]
    fn oversized_receive_buffer_is_discarded() {
        let reactor = Reactor::new();
        let (device, _sent) = open_device(&reactor, instant_config());
        // A FEND then an endless unterminated frame.
        device.receive_bytes(&[KISS_FEND]);
        device.receive_bytes(&vec![0x11; MAX_RX_BUFFER + 1]);
        let got = Rc::new(RefCell::new(0));
        {
            let got = Rc::clone(&got);
            device.port(0).received().connect(move |_: &Vec<u8>| *got.borrow_mut() += 1);
        }
        // A well-formed frame afterwards still gets through.
        device.receive_bytes(&[KISS_FEND, 0x00, 9, KISS_FEND]);
        assert_eq!(*got.borrow(), 1);
    }
}
