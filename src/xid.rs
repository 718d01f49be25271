/*! XID parameter codecs and negotiation (AX.25 2.2 §4.3.3.7).

An XID frame carries a list of parameters, each a `PI` (parameter
identifier), a length, and a value. The values mix 16- and 24-bit
little-endian bit fields with big-endian integers, which is what
[`crate::uint`] is for.

[`XidCapabilities`] is one station's advertised view; `negotiate` folds
two of them into the operating parameters both ends must use.
*/
use std::time::Duration;

use crate::uint;
use crate::{Error, Result};

/// Known parameter identifiers.
pub mod pi {
    /// Half/full duplex negotiation.
    pub const CLASSES_OF_PROCEDURE: u8 = 2;
    /// REJ/SREJ/modulo negotiation.
    pub const HDLC_OPTIONAL_FUNCTIONS: u8 = 3;
    /// Outgoing I-field length in bits.
    pub const I_FIELD_LENGTH_TRANSMIT: u8 = 5;
    /// Incoming I-field length in bits.
    pub const I_FIELD_LENGTH_RECEIVE: u8 = 6;
    /// Outgoing window size (k).
    pub const WINDOW_SIZE_TRANSMIT: u8 = 7;
    /// Incoming window size (k).
    pub const WINDOW_SIZE_RECEIVE: u8 = 8;
    /// Wait-for-acknowledge (T1) duration in milliseconds.
    pub const ACKNOWLEDGE_TIMER: u8 = 9;
    /// Retry count (N1).
    pub const RETRIES: u8 = 10;
}

// Classes of Procedure bit assignments, two bytes little-endian.
const COP_BALANCED_ABM: u16 = 0b0000000000000001;
const COP_UNBALANCED_NRM_PRI: u16 = 0b0000000000000010;
const COP_UNBALANCED_NRM_SEC: u16 = 0b0000000000000100;
const COP_UNBALANCED_ARM_PRI: u16 = 0b0000000000001000;
const COP_UNBALANCED_ARM_SEC: u16 = 0b0000000000010000;
const COP_HALF_DUPLEX: u16 = 0b0000000000100000;
const COP_FULL_DUPLEX: u16 = 0b0000000001000000;
const COP_RESERVED_MASK: u16 = 0b1111111110000000;
const COP_RESERVED_POS: u16 = 7;

/// The Classes of Procedure parameter. The defaults are chosen so at
/// most `half_duplex` or `full_duplex` needs setting.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ClassesOfProcedure {
    pub balanced_abm: bool,
    pub unbalanced_nrm_pri: bool,
    pub unbalanced_nrm_sec: bool,
    pub unbalanced_arm_pri: bool,
    pub unbalanced_arm_sec: bool,
    pub half_duplex: bool,
    pub full_duplex: bool,
    /// The nine reserved high bits, reproduced as given.
    pub reserved: u16,
}

impl Default for ClassesOfProcedure {
    fn default() -> Self {
        Self {
            balanced_abm: true,
            unbalanced_nrm_pri: false,
            unbalanced_nrm_sec: false,
            unbalanced_arm_pri: false,
            unbalanced_arm_sec: false,
            half_duplex: false,
            full_duplex: false,
            reserved: 0,
        }
    }
}

impl ClassesOfProcedure {
    fn decode(pv: &[u8]) -> Self {
        let pv = uint::decode(pv, false) as u16;
        Self {
            balanced_abm: pv & COP_BALANCED_ABM != 0,
            unbalanced_nrm_pri: pv & COP_UNBALANCED_NRM_PRI != 0,
            unbalanced_nrm_sec: pv & COP_UNBALANCED_NRM_SEC != 0,
            unbalanced_arm_pri: pv & COP_UNBALANCED_ARM_PRI != 0,
            unbalanced_arm_sec: pv & COP_UNBALANCED_ARM_SEC != 0,
            half_duplex: pv & COP_HALF_DUPLEX != 0,
            full_duplex: pv & COP_FULL_DUPLEX != 0,
            reserved: (pv & COP_RESERVED_MASK) >> COP_RESERVED_POS,
        }
    }

    fn pv(&self) -> Vec<u8> {
        // All bits are reproduced as given, even invalid combinations.
        let mut v = (self.reserved << COP_RESERVED_POS) & COP_RESERVED_MASK;
        for (flag, bit) in [
            (self.balanced_abm, COP_BALANCED_ABM),
            (self.unbalanced_nrm_pri, COP_UNBALANCED_NRM_PRI),
            (self.unbalanced_nrm_sec, COP_UNBALANCED_NRM_SEC),
            (self.unbalanced_arm_pri, COP_UNBALANCED_ARM_PRI),
            (self.unbalanced_arm_sec, COP_UNBALANCED_ARM_SEC),
            (self.half_duplex, COP_HALF_DUPLEX),
            (self.full_duplex, COP_FULL_DUPLEX),
        ] {
            if flag {
                v |= bit;
            }
        }
        uint::encode(u64::from(v), Some(2), false)
    }

    /// Whether this side unambiguously advertises full duplex. The
    /// malformed both-set and both-cleared encodings count as half
    /// duplex.
    #[must_use]
    pub fn advertises_full_duplex(&self) -> bool {
        self.full_duplex && !self.half_duplex
    }
}

// HDLC Optional Functions bit assignments, three bytes little-endian.
const HOF_RESERVED1: u32 = 0b000000000000000000000001;
const HOF_REJ: u32 = 0b000000000000000000000010;
const HOF_SREJ: u32 = 0b000000000000000000000100;
const HOF_UI: u32 = 0b000000000000000000001000;
const HOF_SIM_RIM: u32 = 0b000000000000000000010000;
const HOF_UP: u32 = 0b000000000000000000100000;
const HOF_BASIC_ADDR: u32 = 0b000000000000000001000000;
const HOF_EXTD_ADDR: u32 = 0b000000000000000010000000;
const HOF_DELETE_I_RESP: u32 = 0b000000000000000100000000;
const HOF_DELETE_I_CMD: u32 = 0b000000000000001000000000;
const HOF_MODULO8: u32 = 0b000000000000010000000000;
const HOF_MODULO128: u32 = 0b000000000000100000000000;
const HOF_RSET: u32 = 0b000000000001000000000000;
const HOF_TEST: u32 = 0b000000000010000000000000;
const HOF_RD: u32 = 0b000000000100000000000000;
const HOF_FCS16: u32 = 0b000000001000000000000000;
const HOF_FCS32: u32 = 0b000000010000000000000000;
const HOF_SYNC_TX: u32 = 0b000000100000000000000000;
const HOF_START_STOP_TX: u32 = 0b000001000000000000000000;
const HOF_START_STOP_FLOW_CTL: u32 = 0b000010000000000000000000;
const HOF_START_STOP_TRANSP: u32 = 0b000100000000000000000000;
const HOF_SREJ_MULTIFRAME: u32 = 0b001000000000000000000000;
const HOF_RESERVED2_MASK: u32 = 0b110000000000000000000000;
const HOF_RESERVED2_POS: u32 = 22;

/// The HDLC Optional Functions parameter. The defaults are chosen so
/// at most `rej`, `srej`, `modulo8` and `modulo128` need setting.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct HdlcOptionalFunctions {
    pub modulo128: bool,
    pub modulo8: bool,
    pub srej: bool,
    pub rej: bool,
    pub srej_multiframe: bool,
    pub start_stop_transp: bool,
    pub start_stop_flow_ctl: bool,
    pub start_stop_tx: bool,
    pub sync_tx: bool,
    pub fcs32: bool,
    pub fcs16: bool,
    pub rd: bool,
    pub test: bool,
    pub rset: bool,
    pub delete_i_cmd: bool,
    pub delete_i_resp: bool,
    pub extd_addr: bool,
    pub basic_addr: bool,
    pub up: bool,
    pub sim_rim: bool,
    pub ui: bool,
    /// The two reserved high bits, reproduced as given.
    pub reserved2: u8,
    pub reserved1: bool,
}

impl Default for HdlcOptionalFunctions {
    fn default() -> Self {
        Self {
            modulo128: false,
            modulo8: false,
            srej: false,
            rej: false,
            srej_multiframe: false,
            start_stop_transp: false,
            start_stop_flow_ctl: false,
            start_stop_tx: false,
            sync_tx: true,
            fcs32: false,
            fcs16: true,
            rd: false,
            test: true,
            rset: false,
            delete_i_cmd: false,
            delete_i_resp: false,
            extd_addr: true,
            basic_addr: false,
            up: false,
            sim_rim: false,
            ui: false,
            reserved2: 0,
            reserved1: false,
        }
    }
}

impl HdlcOptionalFunctions {
    fn decode(pv: &[u8]) -> Self {
        let pv = uint::decode(pv, false) as u32;
        Self {
            modulo128: pv & HOF_MODULO128 != 0,
            modulo8: pv & HOF_MODULO8 != 0,
            srej: pv & HOF_SREJ != 0,
            rej: pv & HOF_REJ != 0,
            srej_multiframe: pv & HOF_SREJ_MULTIFRAME != 0,
            start_stop_transp: pv & HOF_START_STOP_TRANSP != 0,
            start_stop_flow_ctl: pv & HOF_START_STOP_FLOW_CTL != 0,
            start_stop_tx: pv & HOF_START_STOP_TX != 0,
            sync_tx: pv & HOF_SYNC_TX != 0,
            fcs32: pv & HOF_FCS32 != 0,
            fcs16: pv & HOF_FCS16 != 0,
            rd: pv & HOF_RD != 0,
            test: pv & HOF_TEST != 0,
            rset: pv & HOF_RSET != 0,
            delete_i_cmd: pv & HOF_DELETE_I_CMD != 0,
            delete_i_resp: pv & HOF_DELETE_I_RESP != 0,
            extd_addr: pv & HOF_EXTD_ADDR != 0,
            basic_addr: pv & HOF_BASIC_ADDR != 0,
            up: pv & HOF_UP != 0,
            sim_rim: pv & HOF_SIM_RIM != 0,
            ui: pv & HOF_UI != 0,
            reserved2: ((pv & HOF_RESERVED2_MASK) >> HOF_RESERVED2_POS) as u8,
            reserved1: pv & HOF_RESERVED1 != 0,
        }
    }

    fn pv(&self) -> Vec<u8> {
        let mut v = (u32::from(self.reserved2) << HOF_RESERVED2_POS) & HOF_RESERVED2_MASK;
        for (flag, bit) in [
            (self.modulo128, HOF_MODULO128),
            (self.modulo8, HOF_MODULO8),
            (self.srej, HOF_SREJ),
            (self.rej, HOF_REJ),
            (self.srej_multiframe, HOF_SREJ_MULTIFRAME),
            (self.start_stop_transp, HOF_START_STOP_TRANSP),
            (self.start_stop_flow_ctl, HOF_START_STOP_FLOW_CTL),
            (self.start_stop_tx, HOF_START_STOP_TX),
            (self.sync_tx, HOF_SYNC_TX),
            (self.fcs32, HOF_FCS32),
            (self.fcs16, HOF_FCS16),
            (self.rd, HOF_RD),
            (self.test, HOF_TEST),
            (self.rset, HOF_RSET),
            (self.delete_i_cmd, HOF_DELETE_I_CMD),
            (self.delete_i_resp, HOF_DELETE_I_RESP),
            (self.extd_addr, HOF_EXTD_ADDR),
            (self.basic_addr, HOF_BASIC_ADDR),
            (self.up, HOF_UP),
            (self.sim_rim, HOF_SIM_RIM),
            (self.ui, HOF_UI),
            (self.reserved1, HOF_RESERVED1),
        ] {
            if flag {
                v |= bit;
            }
        }
        uint::encode(u64::from(v), Some(3), false)
    }
}

/// A single XID parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XidParameter {
    /// Half/full duplex (PI 2).
    ClassesOfProcedure(ClassesOfProcedure),
    /// Reject mode and modulo (PI 3).
    HdlcOptionalFunctions(HdlcOptionalFunctions),
    /// Outgoing I-field length in bits (PI 5).
    IFieldLengthTransmit(u32),
    /// Incoming I-field length in bits (PI 6).
    IFieldLengthReceive(u32),
    /// Outgoing window size (PI 7).
    WindowSizeTransmit(u8),
    /// Incoming window size (PI 8).
    WindowSizeReceive(u8),
    /// T1 duration in milliseconds (PI 9).
    AcknowledgeTimer(u32),
    /// Retry count (PI 10).
    Retries(u32),
    /// A parameter this crate doesn't interpret, carried verbatim.
    Raw {
        /// Parameter identifier.
        pi: u8,
        /// Parameter value; `None` encodes with a zero length.
        pv: Option<Vec<u8>>,
    },
}

impl XidParameter {
    /// The parameter identifier.
    #[must_use]
    pub fn pi(&self) -> u8 {
        match self {
            XidParameter::ClassesOfProcedure(_) => pi::CLASSES_OF_PROCEDURE,
            XidParameter::HdlcOptionalFunctions(_) => pi::HDLC_OPTIONAL_FUNCTIONS,
            XidParameter::IFieldLengthTransmit(_) => pi::I_FIELD_LENGTH_TRANSMIT,
            XidParameter::IFieldLengthReceive(_) => pi::I_FIELD_LENGTH_RECEIVE,
            XidParameter::WindowSizeTransmit(_) => pi::WINDOW_SIZE_TRANSMIT,
            XidParameter::WindowSizeReceive(_) => pi::WINDOW_SIZE_RECEIVE,
            XidParameter::AcknowledgeTimer(_) => pi::ACKNOWLEDGE_TIMER,
            XidParameter::Retries(_) => pi::RETRIES,
            XidParameter::Raw { pi, .. } => *pi,
        }
    }

    /// The encoded parameter value without the PI/length prefix.
    #[must_use]
    pub fn pv(&self) -> Option<Vec<u8>> {
        match self {
            XidParameter::ClassesOfProcedure(p) => Some(p.pv()),
            XidParameter::HdlcOptionalFunctions(p) => Some(p.pv()),
            XidParameter::IFieldLengthTransmit(v)
            | XidParameter::IFieldLengthReceive(v)
            | XidParameter::AcknowledgeTimer(v)
            | XidParameter::Retries(v) => Some(uint::encode(u64::from(*v), None, true)),
            XidParameter::WindowSizeTransmit(v) | XidParameter::WindowSizeReceive(v) => {
                Some(uint::encode(u64::from(*v), Some(1), true))
            }
            XidParameter::Raw { pv, .. } => pv.clone(),
        }
    }

    /// Encode as PI, PL, PV bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.pi()];
        match self.pv() {
            None => out.push(0),
            Some(pv) => {
                out.push(pv.len() as u8);
                out.extend(pv);
            }
        }
        out
    }

    /// Decode one parameter, returning it and the remaining bytes.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < 2 {
            return Err(Error::Truncated("insufficient data for XID parameter"));
        }
        let pi = data[0];
        let pl = data[1] as usize;
        let rest = &data[2..];
        if rest.len() < pl {
            return Err(Error::Truncated("XID parameter is truncated"));
        }
        let (pv, rest) = rest.split_at(pl);
        let pv = (pl > 0).then(|| pv.to_vec());
        let param = match (pi, &pv) {
            (pi::CLASSES_OF_PROCEDURE, Some(pv)) => {
                XidParameter::ClassesOfProcedure(ClassesOfProcedure::decode(pv))
            }
            (pi::HDLC_OPTIONAL_FUNCTIONS, Some(pv)) => {
                XidParameter::HdlcOptionalFunctions(HdlcOptionalFunctions::decode(pv))
            }
            (pi::I_FIELD_LENGTH_TRANSMIT, Some(pv)) => {
                XidParameter::IFieldLengthTransmit(uint::decode(pv, true) as u32)
            }
            (pi::I_FIELD_LENGTH_RECEIVE, Some(pv)) => {
                XidParameter::IFieldLengthReceive(uint::decode(pv, true) as u32)
            }
            (pi::WINDOW_SIZE_TRANSMIT, Some(pv)) => {
                XidParameter::WindowSizeTransmit(uint::decode(pv, true) as u8)
            }
            (pi::WINDOW_SIZE_RECEIVE, Some(pv)) => {
                XidParameter::WindowSizeReceive(uint::decode(pv, true) as u8)
            }
            (pi::ACKNOWLEDGE_TIMER, Some(pv)) => {
                XidParameter::AcknowledgeTimer(uint::decode(pv, true) as u32)
            }
            (pi::RETRIES, Some(pv)) => XidParameter::Retries(uint::decode(pv, true) as u32),
            _ => XidParameter::Raw { pi, pv },
        };
        Ok((param, rest))
    }
}

/// How lost I frames are recovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RejectMode {
    /// T1 expiry drives retransmission; no reject frames.
    #[default]
    Implicit,
    /// REJ requests retransmission from N(R) onward.
    Reject,
    /// SREJ requests exactly the missing frame.
    SelectiveReject,
    /// Both REJ and SREJ are in use.
    SelectiveRejectReject,
}

/// One station's advertised link parameters, and the fold that turns
/// two of them into the operating parameters of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XidCapabilities {
    /// Willing to run full duplex.
    pub full_duplex: bool,
    /// Supports selective reject.
    pub srej: bool,
    /// Supports reject.
    pub rej: bool,
    /// Supports modulo-128 sequence numbers.
    pub modulo128: bool,
    /// Largest I field this station will accept, in octets.
    pub max_ifield: u32,
    /// Largest number of outstanding I frames this station will accept.
    pub max_outstanding: u8,
    /// T1 in milliseconds.
    pub ack_timeout_ms: u32,
    /// Retry count.
    pub retries: u32,
}

impl Default for XidCapabilities {
    /// The defaults of AX.25 2.2 §6.7.2, assumed for any parameter a
    /// peer does not send.
    fn default() -> Self {
        Self {
            full_duplex: false,
            srej: false,
            rej: false,
            modulo128: false,
            max_ifield: 256,
            max_outstanding: 7,
            ack_timeout_ms: 3000,
            retries: 10,
        }
    }
}

impl XidCapabilities {
    /// Render as the parameter list of an XID command or response.
    #[must_use]
    pub fn to_parameters(&self) -> Vec<XidParameter> {
        vec![
            XidParameter::ClassesOfProcedure(ClassesOfProcedure {
                half_duplex: !self.full_duplex,
                full_duplex: self.full_duplex,
                ..Default::default()
            }),
            XidParameter::HdlcOptionalFunctions(HdlcOptionalFunctions {
                srej: self.srej,
                rej: self.rej,
                modulo8: !self.modulo128,
                modulo128: self.modulo128,
                ..Default::default()
            }),
            // The I-field length parameter is carried in bits.
            XidParameter::IFieldLengthReceive(self.max_ifield * 8),
            XidParameter::WindowSizeReceive(self.max_outstanding),
            XidParameter::AcknowledgeTimer(self.ack_timeout_ms),
            XidParameter::Retries(self.retries),
        ]
    }

    /// Interpret a received parameter list, filling gaps with the
    /// AX.25 2.2 defaults.
    #[must_use]
    pub fn from_parameters(params: &[XidParameter]) -> Self {
        let mut caps = Self::default();
        for param in params {
            match param {
                XidParameter::ClassesOfProcedure(cop) => {
                    caps.full_duplex = cop.advertises_full_duplex();
                }
                XidParameter::HdlcOptionalFunctions(hof) => {
                    caps.srej = hof.srej;
                    caps.rej = hof.rej;
                    caps.modulo128 = hof.modulo128;
                }
                XidParameter::IFieldLengthReceive(bits) => caps.max_ifield = bits / 8,
                XidParameter::WindowSizeReceive(k) => caps.max_outstanding = *k,
                XidParameter::AcknowledgeTimer(ms) => caps.ack_timeout_ms = *ms,
                XidParameter::Retries(n) => caps.retries = *n,
                _ => {}
            }
        }
        caps
    }

    /// Fold this station's capabilities with the remote station's into
    /// the parameters the connection will run with.
    #[must_use]
    pub fn negotiate(&self, remote: &Self) -> XidNegotiated {
        let reject_mode = match (self.srej && remote.srej, self.rej && remote.rej) {
            (true, true) => RejectMode::SelectiveRejectReject,
            (true, false) => RejectMode::SelectiveReject,
            (false, true) => RejectMode::Reject,
            (false, false) => RejectMode::Implicit,
        };
        XidNegotiated {
            full_duplex: self.full_duplex && remote.full_duplex,
            reject_mode,
            modulo128: self.modulo128 && remote.modulo128,
            max_ifield: self.max_ifield.min(remote.max_ifield),
            max_outstanding: self.max_outstanding.min(remote.max_outstanding),
            ack_timeout: Duration::from_millis(u64::from(
                self.ack_timeout_ms.max(remote.ack_timeout_ms),
            )),
            retries: self.retries.max(remote.retries),
        }
    }
}

/// The outcome of an XID exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XidNegotiated {
    /// Full duplex only if both sides agreed.
    pub full_duplex: bool,
    /// Common reject discipline.
    pub reject_mode: RejectMode,
    /// Modulo 128 only if both sides advertised it.
    pub modulo128: bool,
    /// Smaller of the two I-field limits, in octets.
    pub max_ifield: u32,
    /// Smaller of the two window sizes.
    pub max_outstanding: u8,
    /// Larger of the two T1 durations.
    pub ack_timeout: Duration,
    /// Larger of the two retry counts.
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cop_roundtrip() -> Result<()> {
        let param = XidParameter::ClassesOfProcedure(ClassesOfProcedure {
            half_duplex: true,
            ..Default::default()
        });
        let raw = param.encode();
        assert_eq!(raw, vec![0x02, 0x02, 0x21, 0x00]);
        let (decoded, rest) = XidParameter::decode(&raw)?;
        assert!(rest.is_empty());
        assert_eq!(decoded, param);
        Ok(())
    }

    #[test]
    fn hof_roundtrip() -> Result<()> {
        let param = XidParameter::HdlcOptionalFunctions(HdlcOptionalFunctions {
            srej: true,
            rej: true,
            modulo8: true,
            ..Default::default()
        });
        let raw = param.encode();
        // SREJ|REJ|modulo8|sync_tx|fcs16|test|extd_addr = 0x02a486,
        // little endian.
        assert_eq!(raw, vec![0x03, 0x03, 0x86, 0xa4, 0x02]);
        let (decoded, rest) = XidParameter::decode(&raw)?;
        assert!(rest.is_empty());
        assert_eq!(decoded, param);
        Ok(())
    }

    #[test]
    fn numeric_params_are_big_endian() -> Result<()> {
        let param = XidParameter::AcknowledgeTimer(10000);
        assert_eq!(param.encode(), vec![0x09, 0x02, 0x27, 0x10]);
        let param = XidParameter::IFieldLengthReceive(2048);
        assert_eq!(param.encode(), vec![0x06, 0x02, 0x08, 0x00]);
        let param = XidParameter::WindowSizeReceive(7);
        assert_eq!(param.encode(), vec![0x08, 0x01, 0x07]);
        Ok(())
    }

    #[test]
    fn unknown_param_preserved() -> Result<()> {
        let raw = [0x40, 0x03, 0x01, 0x02, 0x03, 0x08, 0x01, 0x04];
        let (param, rest) = XidParameter::decode(&raw)?;
        assert_eq!(
            param,
            XidParameter::Raw {
                pi: 0x40,
                pv: Some(vec![0x01, 0x02, 0x03]),
            }
        );
        let (param, rest) = XidParameter::decode(rest)?;
        assert_eq!(param, XidParameter::WindowSizeReceive(4));
        assert!(rest.is_empty());
        assert_eq!(
            XidParameter::Raw {
                pi: 0x40,
                pv: Some(vec![0x01, 0x02, 0x03])
            }
            .encode(),
            &raw[0..5]
        );
        Ok(())
    }

    #[test]
    fn zero_length_param() -> Result<()> {
        let raw = [0x06, 0x00];
        let (param, rest) = XidParameter::decode(&raw)?;
        assert!(rest.is_empty());
        assert_eq!(param, XidParameter::Raw { pi: 0x06, pv: None });
        assert_eq!(param.encode(), raw);
        Ok(())
    }

    #[test]
    fn truncated_param() {
        assert!(XidParameter::decode(&[0x06]).is_err());
        assert!(XidParameter::decode(&[0x06, 0x04, 0x01]).is_err());
    }

    #[test]
    fn negotiation_folds() {
        // The §6.7.2 worked example: min I-field, min window, max T1,
        // max retries, modulo 8 when either side stays at 8.
        let initiator = XidCapabilities {
            max_ifield: 256,
            max_outstanding: 8,
            ack_timeout_ms: 5000,
            retries: 5,
            ..Default::default()
        };
        let responder = XidCapabilities {
            max_ifield: 128,
            max_outstanding: 4,
            ack_timeout_ms: 10000,
            retries: 20,
            ..Default::default()
        };
        let negotiated = initiator.negotiate(&responder);
        assert_eq!(negotiated.max_ifield, 128);
        assert_eq!(negotiated.max_outstanding, 4);
        assert_eq!(negotiated.ack_timeout, Duration::from_secs(10));
        assert_eq!(negotiated.retries, 20);
        assert!(!negotiated.modulo128);
        assert!(!negotiated.full_duplex);
        assert_eq!(negotiated.reject_mode, RejectMode::Implicit);
    }

    #[test]
    fn reject_mode_requires_agreement() {
        let both = XidCapabilities {
            srej: true,
            rej: true,
            ..Default::default()
        };
        let srej_only = XidCapabilities {
            srej: true,
            ..Default::default()
        };
        let neither = XidCapabilities::default();
        assert_eq!(
            both.negotiate(&both).reject_mode,
            RejectMode::SelectiveRejectReject
        );
        assert_eq!(
            both.negotiate(&srej_only).reject_mode,
            RejectMode::SelectiveReject
        );
        assert_eq!(both.negotiate(&neither).reject_mode, RejectMode::Implicit);
    }

    #[test]
    fn capabilities_roundtrip_through_parameters() {
        let caps = XidCapabilities {
            full_duplex: false,
            srej: true,
            rej: false,
            modulo128: true,
            max_ifield: 512,
            max_outstanding: 63,
            ack_timeout_ms: 4000,
            retries: 12,
        };
        let params = caps.to_parameters();
        assert_eq!(XidCapabilities::from_parameters(&params), caps);
    }

    #[test]
    fn missing_parameters_take_defaults() {
        let caps = XidCapabilities::from_parameters(&[]);
        assert_eq!(caps.max_ifield, 256);
        assert_eq!(caps.max_outstanding, 7);
        assert_eq!(caps.ack_timeout_ms, 3000);
        assert_eq!(caps.retries, 10);
    }
}
