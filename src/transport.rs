/*! Byte pipes a KISS TNC can sit behind: a serial port, a subprocess
speaking KISS on stdio, or a TCP connection.

Each pipe spawns one small reader thread that forwards everything it
reads to the reactor's I/O channel, tagged with the pipe's
[`SourceId`]. Writes happen from the loop thread through [`BytePipe`].
The reader thread exits on EOF, on error, or when the reactor side of
the channel goes away.
*/
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::OpenOptionsExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread;

use log::{debug, warn};
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};

use crate::config::TransportConfig;
use crate::reactor::{IoEvent, SourceEvent, SourceId};
use crate::{Error, Result};

/// The write half of an open byte pipe.
pub trait BytePipe {
    /// Write raw bytes to the TNC.
    fn send_raw(&mut self, data: &[u8]) -> io::Result<()>;
    /// Release the pipe. Any reader thread notices on EOF.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Open the byte pipe described by `config`. Bytes read from it are
/// sent to `tx` tagged with `source`.
pub fn open(
    config: &TransportConfig,
    tx: Sender<SourceEvent>,
    source: SourceId,
) -> Result<Box<dyn BytePipe>> {
    match config {
        TransportConfig::Serial { device, baudrate } => {
            let pipe = SerialPipe::open(device, *baudrate)?;
            spawn_reader(pipe.file.try_clone()?, tx, source);
            Ok(Box::new(pipe))
        }
        TransportConfig::Subprocess { command } => {
            let mut pipe = SubprocessPipe::spawn(command)?;
            let stdout = pipe
                .child
                .stdout
                .take()
                .ok_or_else(|| Error::InvalidState("subprocess stdout not captured".into()))?;
            spawn_reader(stdout, tx, source);
            Ok(Box::new(pipe))
        }
        TransportConfig::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))?;
            spawn_reader(stream.try_clone()?, tx, source);
            Ok(Box::new(TcpPipe { stream }))
        }
    }
}

fn spawn_reader(mut pipe: impl Read + Send + 'static, tx: Sender<SourceEvent>, source: SourceId) {
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => {
                    debug!("pipe reached EOF");
                    let _ = tx.send(SourceEvent {
                        source,
                        event: IoEvent::Closed,
                    });
                    return;
                }
                Ok(n) => {
                    if tx
                        .send(SourceEvent {
                            source,
                            event: IoEvent::Data(buf[..n].to_vec()),
                        })
                        .is_err()
                    {
                        // Reactor is gone; nothing left to read for.
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let _ = tx.send(SourceEvent {
                        source,
                        event: IoEvent::Error(e),
                    });
                    return;
                }
            }
        }
    });
}

fn baud_rate(baudrate: u32) -> Result<BaudRate> {
    Ok(match baudrate {
        300 => BaudRate::B300,
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        other => {
            return Err(Error::InvalidState(format!(
                "unsupported serial baud rate {other}"
            )));
        }
    })
}

struct SerialPipe {
    file: File,
}

impl SerialPipe {
    fn open(device: &str, baudrate: u32) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(device)?;

        // 8N1, raw, no flow control, ignore modem control lines.
        let mut tio = termios::tcgetattr(&file).map_err(io::Error::from)?;
        termios::cfmakeraw(&mut tio);
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        tio.control_flags &= !(ControlFlags::CRTSCTS | ControlFlags::CSTOPB | ControlFlags::PARENB);
        let rate = baud_rate(baudrate)?;
        termios::cfsetispeed(&mut tio, rate).map_err(io::Error::from)?;
        termios::cfsetospeed(&mut tio, rate).map_err(io::Error::from)?;
        termios::tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(io::Error::from)?;

        debug!("opened serial device {device} at {baudrate} baud");
        Ok(Self { file })
    }
}

impl BytePipe for SerialPipe {
    fn send_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

struct SubprocessPipe {
    child: Child,
}

impl SubprocessPipe {
    fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::InvalidState("empty subprocess command".into()))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        debug!("spawned TNC subprocess {program}");
        Ok(Self { child })
    }
}

impl BytePipe for SubprocessPipe {
    fn send_raw(&mut self, data: &[u8]) -> io::Result<()> {
        match self.child.stdin.as_mut() {
            Some(stdin) => stdin.write_all(data),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "subprocess stdin closed",
            )),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        drop(self.child.stdin.take());
        if let Err(e) = self.child.kill() {
            warn!("failed to kill TNC subprocess: {e}");
        }
        self.child.wait()?;
        Ok(())
    }
}

/// An in-memory pipe: writes accumulate in a shared buffer instead of
/// going anywhere. Useful for tests and dry runs; feed the receive
/// direction with [`crate::kiss::KissDevice::receive_bytes`].
pub struct LoopbackPipe {
    sent: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
    open: bool,
}

impl LoopbackPipe {
    /// Create a pipe and the buffer its writes land in.
    pub fn new() -> (Self, std::rc::Rc<std::cell::RefCell<Vec<u8>>>) {
        let sent = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        (
            Self {
                sent: std::rc::Rc::clone(&sent),
                open: true,
            },
            sent,
        )
    }
}

impl BytePipe for LoopbackPipe {
    fn send_raw(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback closed"));
        }
        self.sent.borrow_mut().extend_from_slice(data);
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }
}

struct TcpPipe {
    stream: TcpStream,
}

impl BytePipe for TcpPipe {
    fn send_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}
