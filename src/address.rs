/*! AX.25 addressing: callsign + SSID, and digipeater paths.

A wire address is seven bytes: six callsign characters shifted left one
bit, then an SSID byte holding the SSID in bits 1–4, the C/H bit in bit
7, two reserved bits in bits 5–6 and the extension bit in bit 0. The
human form is `CALL[-SSID][*]`, where a trailing asterisk marks the H
bit ("has been repeated").
*/
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use itertools::Itertools;
use regex::Regex;

use crate::{Error, Result};

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9A-Z]+)(?:-([0-9]{1,2}))?(\*?)$").unwrap())
}

/// An AX.25 address: callsign, SSID and the per-address header bits.
///
/// Equality and hashing cover every field, including the C/H, reserved
/// and extension bits. Use [`AX25Address::normalised`] before using an
/// address as a lookup key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AX25Address {
    callsign: String,
    ssid: u8,
    ch: bool,
    res0: bool,
    res1: bool,
    extension: bool,
}

impl AX25Address {
    /// Create an address with explicit header bits.
    pub fn new(callsign: &str, ssid: u8, ch: bool, res0: bool, res1: bool, extension: bool) -> Self {
        Self {
            callsign: callsign.to_uppercase(),
            ssid: ssid & 0x0f,
            ch,
            res0,
            res1,
            extension,
        }
    }

    /// Create a plain address from callsign and SSID, all bits at their
    /// normalised defaults.
    pub fn local(callsign: &str, ssid: u8) -> Self {
        Self::new(callsign, ssid, false, true, true, false)
    }

    /// Decode a 7-byte wire address.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(Error::Truncated("AX.25 addresses must be 7 bytes"));
        }
        let callsign: String = data[0..6]
            .iter()
            .map(|b| char::from(b >> 1))
            .collect::<String>()
            .trim_end()
            .to_string();
        if !callsign.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidAddress(format!(
                "callsign {callsign:?} is not alphanumeric"
            )));
        }
        let ssid = (data[6] & 0b00011110) >> 1;
        Ok(Self {
            callsign,
            ssid,
            ch: data[6] & 0b10000000 != 0,
            res1: data[6] & 0b01000000 != 0,
            res0: data[6] & 0b00100000 != 0,
            extension: data[6] & 0b00000001 != 0,
        })
    }

    /// Encode as 7 wire bytes. The callsign is space padded to six
    /// characters and truncated beyond that.
    #[must_use]
    pub fn encode(&self) -> [u8; 7] {
        let mut out = [b' ' << 1; 7];
        for (o, c) in out.iter_mut().zip(self.callsign.bytes().take(6)) {
            *o = c << 1;
        }
        let mut ssid = self.ssid << 1;
        if self.extension {
            ssid |= 0b00000001;
        }
        if self.res0 {
            ssid |= 0b00100000;
        }
        if self.res1 {
            ssid |= 0b01000000;
        }
        if self.ch {
            ssid |= 0b10000000;
        }
        out[6] = ssid;
        out
    }

    /// The station callsign, upper case, without SSID.
    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// Secondary Station Identifier, 0–15.
    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// C/H bit. On source and destination addresses this is the
    /// command/response bit; on repeater addresses it is the
    /// "has been repeated" bit.
    pub fn ch(&self) -> bool {
        self.ch
    }

    /// Reserved bit 0 (bit 5 of the SSID byte).
    pub fn res0(&self) -> bool {
        self.res0
    }

    /// Reserved bit 1 (bit 6 of the SSID byte).
    pub fn res1(&self) -> bool {
        self.res1
    }

    /// Extension bit, set on the last address of a frame header.
    pub fn extension(&self) -> bool {
        self.extension
    }

    /// Copy with a different C/H bit.
    #[must_use]
    pub fn with_ch(&self, ch: bool) -> Self {
        Self { ch, ..self.clone() }
    }

    /// Copy with a different extension bit.
    #[must_use]
    pub fn with_extension(&self, extension: bool) -> Self {
        Self {
            extension,
            ..self.clone()
        }
    }

    /// Copy with a different SSID.
    #[must_use]
    pub fn with_ssid(&self, ssid: u8) -> Self {
        Self {
            ssid: ssid & 0x0f,
            ..self.clone()
        }
    }

    /// Normalised copy: C/H and extension cleared, both reserved bits
    /// set. This is the form used as a dictionary key.
    #[must_use]
    pub fn normalised(&self) -> Self {
        Self {
            res0: true,
            res1: true,
            ch: false,
            extension: false,
            ..self.clone()
        }
    }
}

impl FromStr for AX25Address {
    type Err = Error;

    /// Parse the human form `CALL[-SSID][*]`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.to_uppercase();
        let m = call_re()
            .captures(&s)
            .ok_or_else(|| Error::InvalidAddress(format!("not a valid callsign: {s:?}")))?;
        let ssid = match m.get(2) {
            Some(digits) => {
                let ssid: u8 = digits
                    .as_str()
                    .parse()
                    .map_err(|_| Error::InvalidAddress(format!("bad SSID in {s:?}")))?;
                if ssid > 15 {
                    return Err(Error::InvalidAddress(format!("SSID out of range in {s:?}")));
                }
                ssid
            }
            None => 0,
        };
        Ok(Self::new(&m[1], ssid, &m[3] == "*", true, true, false))
    }
}

impl fmt::Display for AX25Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.callsign)?;
        if self.ssid > 0 {
            write!(f, "-{}", self.ssid)?;
        }
        if self.ch {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// An ordered, immutable digipeater path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct AX25Path(Vec<AX25Address>);

impl AX25Path {
    /// Create a path from the given repeater addresses.
    pub fn new(path: impl IntoIterator<Item = AX25Address>) -> Self {
        Self(path.into_iter().collect())
    }

    /// Empty path (no digipeaters).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Parse a comma separated path such as `WIDE1-1,WIDE2-1`.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        s.split(',').map(AX25Address::from_str).collect::<Result<Vec<_>>>().map(Self)
    }

    /// The reply path: the repeaters whose H bit is set, in reverse
    /// order, each with the H bit cleared. This is the path a reply
    /// should traverse.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self(
            self.0
                .iter()
                .rev()
                .filter(|digi| digi.ch())
                .map(|digi| digi.with_ch(false))
                .collect(),
        )
    }

    /// Replace an alias (e.g. `WIDE1-1`, compared normalised) with a
    /// concrete address, returning the new path.
    #[must_use]
    pub fn replace(&self, alias: &AX25Address, address: &AX25Address) -> Self {
        let alias = alias.normalised();
        Self(
            self.0
                .iter()
                .map(|digi| {
                    if digi.normalised() == alias {
                        address.clone()
                    } else {
                        digi.clone()
                    }
                })
                .collect(),
        )
    }
}

impl std::ops::Deref for AX25Path {
    type Target = [AX25Address];
    fn deref(&self) -> &[AX25Address] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a AX25Path {
    type Item = &'a AX25Address;
    type IntoIter = std::slice::Iter<'a, AX25Address>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<AX25Address> for AX25Path {
    fn from_iter<T: IntoIterator<Item = AX25Address>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for AX25Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(","))
    }
}
