/*! AX.25 framing: encoders and decoders for every frame type in
version 2.2 of the standard.

The control field of an I or S frame is 8 or 16 bits wide depending on
whether modulo-128 operation was negotiated, and nothing in the frame
itself says which. A stateless decoder therefore cannot fully dissect an
arbitrary frame: [`AX25Frame::decode`] takes `modulo128: Option<bool>`,
and when it is `None` any I or S frame comes back as
[`AX25FrameBody::Raw`] for the connection owner to re-dissect with
[`AX25Frame::redecode`] once its modulo is known.

The control field is sent little-endian, so the first byte on the wire
is the least significant one, and its low two bits are enough to tell
I, S and U frames apart. U frames always use the 8-bit form.
*/
use std::fmt;
use std::time::SystemTime;

use crate::address::{AX25Address, AX25Path};
use crate::uint;
use crate::xid::XidParameter;
use crate::{Error, Result};

/// Protocol identifiers carried by I and UI frames (AX.25 2.2 §3.2).
pub mod pid {
    /// ISO 8208 / CCITT X.25 PLP.
    pub const ISO8208_CCITT: u8 = 0x01;
    /// Van Jacobson compressed TCP/IP.
    pub const VJ_IP4_COMPRESS: u8 = 0x06;
    /// Van Jacobson uncompressed TCP/IP.
    pub const VJ_IP4: u8 = 0x07;
    /// Segmentation fragment.
    pub const SEGMENTATION: u8 = 0x08;
    /// TEXNET datagram protocol.
    pub const TEXNET: u8 = 0xC3;
    /// Link Quality Protocol.
    pub const LINKQUALITY: u8 = 0xC4;
    /// AppleTalk.
    pub const APPLETALK: u8 = 0xCA;
    /// AppleTalk ARP.
    pub const APPLETALK_ARP: u8 = 0xCB;
    /// ARPA Internet Protocol.
    pub const ARPA_IP4: u8 = 0xCC;
    /// ARPA Address Resolution.
    pub const ARPA_ARP: u8 = 0xCD;
    /// FlexNet.
    pub const FLEXNET: u8 = 0xCE;
    /// NET/ROM.
    pub const NETROM: u8 = 0xCF;
    /// No layer 3 protocol. This is the PID used by APRS.
    pub const NO_L3: u8 = 0xF0;
    /// Escape character; next byte carries more level 3 information.
    pub const ESCAPE: u8 = 0xFF;
}

/// U-frame modifier values (control field with P/F masked out).
pub mod modifier {
    /// Unnumbered Information.
    pub const UI: u8 = 0b00000011;
    /// Set Async Balanced Mode (connect, modulo 8).
    pub const SABM: u8 = 0b01101111;
    /// Set Async Balanced Mode Extended (connect, modulo 128).
    pub const SABME: u8 = 0b00101111;
    /// Disconnect request.
    pub const DISC: u8 = 0b01000011;
    /// Disconnected mode.
    pub const DM: u8 = 0b00001111;
    /// Unnumbered acknowledge.
    pub const UA: u8 = 0b01100011;
    /// Frame reject.
    pub const FRMR: u8 = 0b10000111;
    /// Exchange identification.
    pub const XID: u8 = 0b10101111;
    /// Test (echo) frame.
    pub const TEST: u8 = 0b11100011;
}

const CONTROL_US_MASK: u8 = 0b00000011;
const CONTROL_U_VAL: u8 = 0b00000011;
const CONTROL_I_MASK: u8 = 0b00000001;
const MODIFIER_MASK: u8 = 0b11101111;
const POLL_FINAL_8: u8 = 0b00010000;
const POLL_FINAL_16: u16 = 0x0100;

/// An AX.25 frame header: destination, source and up to eight
/// digipeaters, plus the command/response bits.
///
/// `new` canonicalises the address header bits (C bits from `cr`,
/// extension bit on the last address only) so that an encode/decode
/// round trip compares equal.
#[derive(Clone, Debug)]
pub struct AX25FrameHeader {
    /// Destination address. Its C/H bit carries `cr`.
    pub destination: AX25Address,
    /// Source address. Its C/H bit carries `src_cr`.
    pub source: AX25Address,
    /// Digipeater path.
    pub repeaters: AX25Path,
    /// Command (true) or response (false): the destination C bit.
    pub cr: bool,
    /// The source C bit. In AX.25 2.x this is the opposite of `cr`.
    pub src_cr: bool,
    /// Set on receive when both C bits were equal, which marks an
    /// AX.25 1.x station. Never set on locally built frames.
    pub legacy: bool,
}

impl AX25FrameHeader {
    /// Create a header. The source C bit takes the AX.25 2.x default
    /// (the opposite of `cr`).
    pub fn new(
        destination: AX25Address,
        source: AX25Address,
        repeaters: AX25Path,
        cr: bool,
    ) -> Self {
        Self::new_with_src_cr(destination, source, repeaters, cr, !cr)
    }

    /// Create a header with an explicit source C bit.
    pub fn new_with_src_cr(
        destination: AX25Address,
        source: AX25Address,
        repeaters: AX25Path,
        cr: bool,
        src_cr: bool,
    ) -> Self {
        let repeaters: AX25Path = {
            let last = repeaters.len().saturating_sub(1);
            repeaters
                .iter()
                .enumerate()
                .map(|(i, digi)| digi.with_extension(i == last))
                .collect()
        };
        Self {
            destination: destination.with_ch(cr).with_extension(false),
            source: source
                .with_ch(src_cr)
                .with_extension(repeaters.is_empty()),
            repeaters,
            cr,
            src_cr,
            legacy: false,
        }
    }

    /// Decode a header, returning it along with the remaining bytes.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut addresses: Vec<AX25Address> = Vec::new();
        let mut rest = data;
        while !rest.is_empty() && !addresses.last().is_some_and(AX25Address::extension) {
            addresses.push(AX25Address::decode(rest)?);
            rest = &rest[7..];
        }
        if addresses.len() < 2 {
            return Err(Error::layout("too few addresses"));
        }
        let mut it = addresses.into_iter();
        let destination = it.next().unwrap();
        let source = it.next().unwrap();
        let cr = destination.ch();
        let src_cr = source.ch();
        Ok((
            Self {
                // AX.25 1.x stations set the two C bits identically.
                legacy: cr == src_cr,
                destination,
                source,
                repeaters: it.collect(),
                cr,
                src_cr,
            },
            rest,
        ))
    }

    /// Encode the header bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 * (2 + self.repeaters.len()));
        out.extend_from_slice(
            &self
                .destination
                .with_ch(self.cr)
                .with_extension(false)
                .encode(),
        );
        out.extend_from_slice(
            &self
                .source
                .with_ch(self.src_cr)
                .with_extension(self.repeaters.is_empty())
                .encode(),
        );
        let last = self.repeaters.len().saturating_sub(1);
        for (i, digi) in self.repeaters.iter().enumerate() {
            out.extend_from_slice(&digi.with_extension(i == last).encode());
        }
        out
    }

    /// Render in "TNC2" monitor format, ignoring the C bits.
    #[must_use]
    pub fn tnc2(&self) -> String {
        let mut out = format!(
            "{}>{}",
            self.source.with_ch(false),
            self.destination.with_ch(false)
        );
        if !self.repeaters.is_empty() {
            out.push(',');
            out.push_str(&self.repeaters.to_string());
        }
        out
    }
}

impl PartialEq for AX25FrameHeader {
    // `legacy` is derived information, not an observable field.
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination
            && self.source == other.source
            && self.repeaters == other.repeaters
            && self.cr == other.cr
            && self.src_cr == other.src_cr
    }
}
impl Eq for AX25FrameHeader {}

impl fmt::Display for AX25FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        if !self.repeaters.is_empty() {
            write!(f, ",{}", self.repeaters)?;
        }
        Ok(())
    }
}

/// The supervisory function of an S frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SupervisoryCode {
    /// RR: ready to receive, acknowledging up to N(R)-1.
    ReceiveReady = 0b00000000,
    /// RNR: busy, hold further I frames.
    ReceiveNotReady = 0b00000100,
    /// REJ: retransmit from N(R) onward.
    Reject = 0b00001000,
    /// SREJ: retransmit exactly N(R).
    SelectiveReject = 0b00001100,
}

impl SupervisoryCode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b00001100 {
            0b00000000 => SupervisoryCode::ReceiveReady,
            0b00000100 => SupervisoryCode::ReceiveNotReady,
            0b00001000 => SupervisoryCode::Reject,
            _ => SupervisoryCode::SelectiveReject,
        }
    }
}

/// A sequenced information frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InformationFrame {
    /// Receive sequence number N(R).
    pub nr: u8,
    /// Send sequence number N(S).
    pub ns: u8,
    /// Poll/final bit.
    pub pf: bool,
    /// Protocol identifier.
    pub pid: u8,
    /// Information field.
    pub payload: Vec<u8>,
    /// Whether this frame uses the 16-bit (modulo 128) control field.
    pub modulo128: bool,
}

/// A supervisory frame (RR, RNR, REJ, SREJ).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisoryFrame {
    /// Supervisory function.
    pub code: SupervisoryCode,
    /// Receive sequence number N(R).
    pub nr: u8,
    /// Poll/final bit.
    pub pf: bool,
    /// Whether this frame uses the 16-bit (modulo 128) control field.
    pub modulo128: bool,
}

/// An unnumbered frame, discriminated on the modifier bits of the
/// control field (AX.25 2.2 §4.3.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnnumberedFrame {
    /// SABM: connect, modulo 8.
    SetAsyncBalancedMode {
        /// Poll bit.
        pf: bool,
    },
    /// SABME: connect, modulo 128.
    SetAsyncBalancedModeExtended {
        /// Poll bit.
        pf: bool,
    },
    /// DISC: disconnect request.
    Disconnect {
        /// Poll bit.
        pf: bool,
    },
    /// DM: disconnected mode.
    DisconnectMode {
        /// Final bit.
        pf: bool,
    },
    /// UA: unnumbered acknowledge.
    UnnumberedAcknowledge {
        /// Final bit.
        pf: bool,
    },
    /// UI: connectionless data.
    UnnumberedInformation {
        /// Poll/final bit.
        pf: bool,
        /// Protocol identifier.
        pid: u8,
        /// Information field.
        payload: Vec<u8>,
    },
    /// FRMR: frame reject with its 3-byte diagnostic.
    FrameReject {
        /// Final bit.
        pf: bool,
        /// W: control field was invalid or not implemented.
        w: bool,
        /// X: frame carried an information field where none is allowed.
        x: bool,
        /// Y: information field exceeded the maximum length.
        y: bool,
        /// Z: N(R) was invalid.
        z: bool,
        /// Receive state V(R) at the time of rejection.
        vr: u8,
        /// Whether the rejected frame was a command.
        frmr_cr: bool,
        /// Send state V(S) at the time of rejection.
        vs: u8,
        /// Control field of the rejected frame.
        frmr_control: u8,
    },
    /// XID: negotiable parameter exchange.
    ExchangeIdentification {
        /// Poll/final bit.
        pf: bool,
        /// Format identifier (0x82 for AX.25).
        fi: u8,
        /// Group identifier (0x80, parameter negotiation).
        gi: u8,
        /// Negotiation parameters in wire order.
        parameters: Vec<XidParameter>,
    },
    /// TEST: echo request/response with free-form payload.
    Test {
        /// Poll/final bit.
        pf: bool,
        /// Echoed payload.
        payload: Vec<u8>,
    },
    /// A modifier this crate doesn't recognise; carried without payload.
    Other {
        /// The modifier bits, P/F masked out.
        modifier: u8,
        /// Poll/final bit.
        pf: bool,
    },
}

const FRMR_W: u8 = 0b00000001;
const FRMR_X: u8 = 0b00000010;
const FRMR_Y: u8 = 0b00000100;
const FRMR_Z: u8 = 0b00001000;
const FRMR_VR_MASK: u8 = 0b11100000;
const FRMR_VR_POS: u8 = 5;
const FRMR_CR: u8 = 0b00010000;
const FRMR_VS_MASK: u8 = 0b00001110;
const FRMR_VS_POS: u8 = 1;

/// Default XID format identifier for AX.25.
pub const XID_FI_AX25: u8 = 0x82;
/// Default XID group identifier (parameter negotiation group).
pub const XID_GI_PARAMETER_NEGOTIATION: u8 = 0x80;

impl UnnumberedFrame {
    /// The modifier bits of this frame's control field.
    #[must_use]
    pub fn modifier(&self) -> u8 {
        match self {
            UnnumberedFrame::SetAsyncBalancedMode { .. } => modifier::SABM,
            UnnumberedFrame::SetAsyncBalancedModeExtended { .. } => modifier::SABME,
            UnnumberedFrame::Disconnect { .. } => modifier::DISC,
            UnnumberedFrame::DisconnectMode { .. } => modifier::DM,
            UnnumberedFrame::UnnumberedAcknowledge { .. } => modifier::UA,
            UnnumberedFrame::UnnumberedInformation { .. } => modifier::UI,
            UnnumberedFrame::FrameReject { .. } => modifier::FRMR,
            UnnumberedFrame::ExchangeIdentification { .. } => modifier::XID,
            UnnumberedFrame::Test { .. } => modifier::TEST,
            UnnumberedFrame::Other { modifier, .. } => modifier & MODIFIER_MASK,
        }
    }

    /// The poll/final bit.
    #[must_use]
    pub fn pf(&self) -> bool {
        match self {
            UnnumberedFrame::SetAsyncBalancedMode { pf }
            | UnnumberedFrame::SetAsyncBalancedModeExtended { pf }
            | UnnumberedFrame::Disconnect { pf }
            | UnnumberedFrame::DisconnectMode { pf }
            | UnnumberedFrame::UnnumberedAcknowledge { pf }
            | UnnumberedFrame::UnnumberedInformation { pf, .. }
            | UnnumberedFrame::FrameReject { pf, .. }
            | UnnumberedFrame::ExchangeIdentification { pf, .. }
            | UnnumberedFrame::Test { pf, .. }
            | UnnumberedFrame::Other { pf, .. } => *pf,
        }
    }

    /// The 8-bit control field value.
    #[must_use]
    pub fn control(&self) -> u8 {
        self.modifier() | if self.pf() { POLL_FINAL_8 } else { 0 }
    }

    fn decode(control: u8, data: &[u8]) -> Result<Self> {
        let pf = control & POLL_FINAL_8 != 0;
        match control & MODIFIER_MASK {
            modifier::UI => {
                let (&pid, payload) = data
                    .split_first()
                    .ok_or(Error::Truncated("UI payload must be at least one byte"))?;
                Ok(UnnumberedFrame::UnnumberedInformation {
                    pf,
                    pid,
                    payload: payload.to_vec(),
                })
            }
            modifier::FRMR => {
                if data.len() != 3 {
                    return Err(Error::layout("payload of FRMR must be 3 bytes"));
                }
                Ok(UnnumberedFrame::FrameReject {
                    pf,
                    w: data[0] & FRMR_W != 0,
                    x: data[0] & FRMR_X != 0,
                    y: data[0] & FRMR_Y != 0,
                    z: data[0] & FRMR_Z != 0,
                    vr: (data[1] & FRMR_VR_MASK) >> FRMR_VR_POS,
                    frmr_cr: data[1] & FRMR_CR != 0,
                    vs: (data[1] & FRMR_VS_MASK) >> FRMR_VS_POS,
                    frmr_control: data[2],
                })
            }
            modifier::XID => {
                if data.len() < 4 {
                    return Err(Error::Truncated("truncated XID header"));
                }
                let fi = data[0];
                let gi = data[1];
                // GL is big-endian, just for a change.
                let gl = uint::decode(&data[2..4], true) as usize;
                let mut rest = &data[4..];
                if rest.len() != gl {
                    return Err(Error::layout("XID parameter list length mismatch"));
                }
                let mut parameters = Vec::new();
                while !rest.is_empty() {
                    let (param, remain) = XidParameter::decode(rest)?;
                    parameters.push(param);
                    rest = remain;
                }
                Ok(UnnumberedFrame::ExchangeIdentification {
                    pf,
                    fi,
                    gi,
                    parameters,
                })
            }
            modifier::TEST => Ok(UnnumberedFrame::Test {
                pf,
                payload: data.to_vec(),
            }),
            m @ (modifier::SABM
            | modifier::SABME
            | modifier::DISC
            | modifier::DM
            | modifier::UA) => {
                if !data.is_empty() {
                    return Err(Error::layout("frame does not support payload"));
                }
                Ok(match m {
                    modifier::SABM => UnnumberedFrame::SetAsyncBalancedMode { pf },
                    modifier::SABME => UnnumberedFrame::SetAsyncBalancedModeExtended { pf },
                    modifier::DISC => UnnumberedFrame::Disconnect { pf },
                    modifier::DM => UnnumberedFrame::DisconnectMode { pf },
                    _ => UnnumberedFrame::UnnumberedAcknowledge { pf },
                })
            }
            m => {
                if !data.is_empty() {
                    return Err(Error::layout(
                        "unnumbered frames other than UI and FRMR do not have payloads",
                    ));
                }
                Ok(UnnumberedFrame::Other { modifier: m, pf })
            }
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![self.control()];
        match self {
            UnnumberedFrame::UnnumberedInformation { pid, payload, .. } => {
                out.push(*pid);
                out.extend_from_slice(payload);
            }
            UnnumberedFrame::FrameReject {
                w,
                x,
                y,
                z,
                vr,
                frmr_cr,
                vs,
                frmr_control,
                ..
            } => {
                let mut wxyz = 0;
                if *w {
                    wxyz |= FRMR_W;
                }
                if *x {
                    wxyz |= FRMR_X;
                }
                if *y {
                    wxyz |= FRMR_Y;
                }
                if *z {
                    wxyz |= FRMR_Z;
                }
                out.push(wxyz);
                let mut vrcrvs = (vr << FRMR_VR_POS) & FRMR_VR_MASK;
                if *frmr_cr {
                    vrcrvs |= FRMR_CR;
                }
                vrcrvs |= (vs << FRMR_VS_POS) & FRMR_VS_MASK;
                out.push(vrcrvs);
                out.push(*frmr_control);
            }
            UnnumberedFrame::ExchangeIdentification {
                fi, gi, parameters, ..
            } => {
                let params: Vec<u8> = parameters.iter().flat_map(XidParameter::encode).collect();
                out.push(*fi);
                out.push(*gi);
                out.extend(uint::encode(params.len() as u64, Some(2), true));
                out.extend(params);
            }
            UnnumberedFrame::Test { payload, .. } => out.extend_from_slice(payload),
            _ => {}
        }
        out
    }
}

/// The typed body of an AX.25 frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AX25FrameBody {
    /// Control field width undetermined; `payload` holds everything
    /// after the header, control field included.
    Raw {
        /// Undissected body bytes.
        payload: Vec<u8>,
    },
    /// An unnumbered frame.
    Unnumbered(UnnumberedFrame),
    /// A sequenced information frame.
    Information(InformationFrame),
    /// A supervisory frame.
    Supervisory(SupervisoryFrame),
}

/// A complete AX.25 frame: header, typed body, and queueing metadata.
///
/// Frames are immutable once constructed. The creation `timestamp` and
/// optional transmit `deadline` are not part of the wire form and do
/// not take part in equality.
#[derive(Clone, Debug)]
pub struct AX25Frame {
    /// Addressing header.
    pub header: AX25FrameHeader,
    /// Typed frame body.
    pub body: AX25FrameBody,
    /// Creation time.
    pub timestamp: SystemTime,
    /// If set, the frame is dropped instead of transmitted once this
    /// wall-clock time has passed.
    pub deadline: Option<SystemTime>,
}

impl AX25Frame {
    /// Create a frame with the current time as its timestamp.
    pub fn new(header: AX25FrameHeader, body: AX25FrameBody) -> Self {
        Self {
            header,
            body,
            timestamp: SystemTime::now(),
            deadline: None,
        }
    }

    /// Set a transmit deadline, consuming the frame.
    #[must_use]
    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Decode a frame. `modulo128` supplies the negotiated control
    /// field width of the link, if known; without it any I or S frame
    /// decodes as [`AX25FrameBody::Raw`].
    pub fn decode(data: &[u8], modulo128: Option<bool>) -> Result<Self> {
        let (header, rest) = AX25FrameHeader::decode(data)?;
        let body = Self::decode_body(rest, modulo128)?;
        Ok(Self::new(header, body))
    }

    /// Re-dissect a frame once the control field width is known. Only
    /// meaningful on frames with a [`AX25FrameBody::Raw`] body; other
    /// frames are re-dissected from their own encoding.
    pub fn redecode(&self, modulo128: bool) -> Result<Self> {
        let body = Self::decode_body(&self.body_bytes(), Some(modulo128))?;
        Ok(Self {
            header: self.header.clone(),
            body,
            timestamp: self.timestamp,
            deadline: self.deadline,
        })
    }

    fn decode_body(data: &[u8], modulo128: Option<bool>) -> Result<AX25FrameBody> {
        let &control8 = data.first().ok_or(Error::Truncated("insufficient packet data"))?;
        if control8 & CONTROL_US_MASK == CONTROL_U_VAL {
            return Ok(AX25FrameBody::Unnumbered(UnnumberedFrame::decode(
                control8,
                &data[1..],
            )?));
        }
        let modulo128 = match modulo128 {
            // Without the connection state we can't know the control
            // field width; return the body undissected.
            None => return Ok(AX25FrameBody::Raw {
                payload: data.to_vec(),
            }),
            Some(m) => m,
        };
        let (control, rest) = if modulo128 {
            if data.len() < 2 {
                return Err(Error::Truncated("insufficient packet data"));
            }
            (u16::from(control8) | (u16::from(data[1]) << 8), &data[2..])
        } else {
            (u16::from(control8), &data[1..])
        };
        if control8 & CONTROL_I_MASK == 0 {
            // I frame.
            let (nr, ns, pf) = if modulo128 {
                (
                    ((control >> 9) & 0x7f) as u8,
                    ((control >> 1) & 0x7f) as u8,
                    control & POLL_FINAL_16 != 0,
                )
            } else {
                (
                    ((control8 & 0b11100000) >> 5),
                    ((control8 & 0b00001110) >> 1),
                    control8 & POLL_FINAL_8 != 0,
                )
            };
            let (&pid, payload) = rest
                .split_first()
                .ok_or(Error::Truncated("I frame must carry a PID"))?;
            Ok(AX25FrameBody::Information(InformationFrame {
                nr,
                ns,
                pf,
                pid,
                payload: payload.to_vec(),
                modulo128,
            }))
        } else {
            // S frame. No payload is permitted.
            if !rest.is_empty() {
                return Err(Error::layout("supervisory frames do not support payloads"));
            }
            let (nr, pf) = if modulo128 {
                (((control >> 9) & 0x7f) as u8, control & POLL_FINAL_16 != 0)
            } else {
                ((control8 & 0b11100000) >> 5, control8 & POLL_FINAL_8 != 0)
            };
            Ok(AX25FrameBody::Supervisory(SupervisoryFrame {
                code: SupervisoryCode::from_bits(control8),
                nr,
                pf,
                modulo128,
            }))
        }
    }

    /// The body bytes: control field, then PID and information field
    /// where the frame type has them.
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.body {
            AX25FrameBody::Raw { payload } => payload.clone(),
            AX25FrameBody::Unnumbered(u) => u.encode_body(),
            AX25FrameBody::Information(i) => {
                let mut out = if i.modulo128 {
                    let control = (u16::from(i.nr & 0x7f) << 9)
                        | if i.pf { POLL_FINAL_16 } else { 0 }
                        | (u16::from(i.ns & 0x7f) << 1);
                    // Little endian, to keep S and U frames distinguishable
                    // from the first byte.
                    uint::encode(u64::from(control), Some(2), false)
                } else {
                    vec![
                        ((i.nr << 5) & 0b11100000)
                            | if i.pf { POLL_FINAL_8 } else { 0 }
                            | ((i.ns << 1) & 0b00001110),
                    ]
                };
                out.push(i.pid);
                out.extend_from_slice(&i.payload);
                out
            }
            AX25FrameBody::Supervisory(s) => {
                if s.modulo128 {
                    let control = (u16::from(s.nr & 0x7f) << 9)
                        | if s.pf { POLL_FINAL_16 } else { 0 }
                        | u16::from(s.code as u8)
                        | 0x0001;
                    uint::encode(u64::from(control), Some(2), false)
                } else {
                    vec![
                        ((s.nr << 5) & 0b11100000)
                            | if s.pf { POLL_FINAL_8 } else { 0 }
                            | s.code as u8
                            | 0b00000001,
                    ]
                }
            }
        }
    }

    /// Encode the complete frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        out.extend(self.body_bytes());
        out
    }

    /// Render a UI frame in "TNC2" monitor format, decoding the
    /// payload as Latin-1. Returns `None` for other frame types.
    #[must_use]
    pub fn tnc2(&self) -> Option<String> {
        match &self.body {
            AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedInformation {
                payload, ..
            }) => {
                let text: String = payload.iter().map(|&b| char::from(b)).collect();
                Some(format!("{}:{}", self.header.tnc2(), text))
            }
            _ => None,
        }
    }
}

impl PartialEq for AX25Frame {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.body == other.body
    }
}
impl Eq for AX25Frame {}

impl fmt::Display for AX25Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        match &self.body {
            AX25FrameBody::Raw { payload } => write!(f, ": raw {} bytes", payload.len()),
            AX25FrameBody::Unnumbered(u) => match u {
                UnnumberedFrame::UnnumberedInformation { pid, payload, .. } => {
                    write!(f, ": UI PID=0x{pid:02x} Payload={payload:?}")
                }
                UnnumberedFrame::Test { payload, .. } => {
                    write!(f, ": TEST Payload={payload:?}")
                }
                other => write!(f, ": U modifier=0x{:02x}", other.modifier()),
            },
            AX25FrameBody::Information(i) => write!(
                f,
                ": I N(R)={} P/F={} N(S)={} PID=0x{:02x} Payload={:?}",
                i.nr, i.pf, i.ns, i.pid, i.payload
            ),
            AX25FrameBody::Supervisory(s) => {
                write!(f, ": S N(R)={} P/F={} {:?}", s.nr, s.pf, s.code)
            }
        }
    }
}
