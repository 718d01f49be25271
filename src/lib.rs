#![warn(missing_docs)]
/*! This crate provides a pure-software AX.25 v2.2 link layer stack for
amateur packet radio.

No modem or DSP code lives here: audio to and from bits is the job of an
external TNC speaking the [KISS][kiss] protocol over a serial port, a
subprocess pipe, or a TCP socket. Everything above that byte-pipe is
implemented in this crate:

```text
      [ KISS TNC (external) ]
               ↕ bytes
        [ kiss::KissDevice ]
               ↕ frames per port
     [ interface::AX25Interface ]
         ↕ decoded AX.25 frames
  [ station::AX25Station / peers ]      [ aprs::AprsInterface ]
               ↕                                  ↕
    connected-mode data transfer        UI frames, messaging, digipeating
```

# Architecture overview

The stack is callback driven and single threaded. One
[`reactor::Reactor`] owns every timer and dispatches every inbound byte;
all protocol state is mutated from reactor callbacks, so no locks are
needed anywhere. Transports feed the reactor from small reader threads
through a channel, which is the only place threads appear.

The frame codec ([`frame`], [`address`], [`xid`]) is pure and usable on
its own: `AX25Frame::decode` turns raw bytes into a typed frame variant,
and every variant knows how to serialise itself back, bit for bit.

Connected-mode operation (SABM/SABME, I-frame windowing, REJ/SREJ
recovery, XID parameter negotiation) lives in [`peer`], with
[`station::AX25Station`] owning one peer per remote callsign.

The APRS layer ([`aprs`]) sits on UI frames: data-type dissection,
message retries with ACK/REJ and reply-ACK, deduplication, and WIDEn-N
digipeating.

# Examples

Decode a frame captured off the air:

```
use ax25link::frame::AX25Frame;
let raw = b"\xac\x96\x68\x84\xae\x92\xe0\xac\x96\x68\x9a\xa6\x98\x61\x03\xf0Hi";
let frame = AX25Frame::decode(raw, None)?;
assert_eq!(frame.header.source.to_string(), "VK4MSL");
# Ok::<(), ax25link::Error>(())
```

[kiss]: https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)
 */

pub mod address;
pub mod aprs;
pub mod config;
pub mod frame;
pub mod interface;
pub mod kiss;
pub mod peer;
pub mod reactor;
pub mod signal;
pub mod station;
pub mod transport;
pub mod uint;
pub mod xid;

#[cfg(test)]
pub(crate) mod testutil;

/// Errors produced by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Ran out of bytes while decoding a frame, address, or parameter.
    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    /// The bytes were all there, but their layout is not valid AX.25.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// A callsign or SSID that can't be represented on the wire.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// An operation was attempted in a state that doesn't permit it,
    /// e.g. opening a KISS device that is not closed.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// APRS payload that doesn't parse as the data type it claims.
    #[error("invalid APRS payload: {0}")]
    InvalidAprs(String),

    /// Underlying byte-pipe error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn layout(msg: impl Into<String>) -> Self {
        Error::InvalidLayout(msg.into())
    }
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
