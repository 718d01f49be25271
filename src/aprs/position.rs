/*! APRS position reports, in both coordinate encodings.

Uncompressed positions spell the coordinate out in degrees and decimal
minutes (`4903.50N/07201.75W-`), with positional ambiguity expressed by
blanking trailing minute digits. Compressed positions pack the same
information into 13 bytes of base-91 text, with an optional
course/speed, radio-range, or altitude extension and a compression
type byte.
*/
use std::fmt;

use crate::aprs::compression::{BYTE_VALUE_OFFSET, compress, decompress};
use crate::aprs::datatype::AprsDataType;
use crate::aprs::datetime::AprsTimestamp;
use crate::aprs::symbol::AprsSymbol;
use crate::{Error, Result};

/// Positional ambiguity of an uncompressed coordinate: how many
/// trailing minute digits were blanked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Ambiguity {
    /// All digits present.
    #[default]
    None,
    /// Hundredths blanked; precision one tenth of a minute.
    TenthMinute,
    /// Both decimals blanked; precision one minute.
    Minute,
    /// Ones of minutes blanked too; precision ten minutes.
    TenMinutes,
    /// All minute digits blanked; precision one degree.
    Degree,
}

impl Ambiguity {
    /// Number of blanked digits, 0–4.
    #[must_use]
    pub fn level(self) -> usize {
        match self {
            Ambiguity::None => 0,
            Ambiguity::TenthMinute => 1,
            Ambiguity::Minute => 2,
            Ambiguity::TenMinutes => 3,
            Ambiguity::Degree => 4,
        }
    }

    fn from_level(level: usize) -> Result<Self> {
        Ok(match level {
            0 => Ambiguity::None,
            1 => Ambiguity::TenthMinute,
            2 => Ambiguity::Minute,
            3 => Ambiguity::TenMinutes,
            4 => Ambiguity::Degree,
            _ => return Err(Error::InvalidAprs("ambiguity beyond one degree".into())),
        })
    }
}

// Shared digits-and-suffix codec for latitude and longitude. The
// minute digits eligible for ambiguity blanking sit at deg_digits,
// deg_digits+1 (minutes) and deg_digits+3, deg_digits+4 (decimals).
fn decode_angle(
    s: &str,
    deg_digits: usize,
    pos_suffix: char,
    neg_suffix: char,
) -> Result<(u16, u8, u8, bool, Ambiguity)> {
    let len = deg_digits + 6;
    if s.len() < len || !s.is_ascii() {
        return Err(Error::InvalidAprs(format!("position string too short: {s:?}")));
    }
    let s = &s[..len];
    let suffix = s.chars().nth(len - 1).unwrap();
    let negative = if suffix == pos_suffix {
        false
    } else if suffix == neg_suffix {
        true
    } else {
        return Err(Error::InvalidAprs(format!("unrecognised sign: {suffix:?}")));
    };
    if s.as_bytes()[deg_digits + 2] != b'.' {
        return Err(Error::InvalidAprs(format!("no decimal point in {s:?}")));
    }

    let digit_at = [deg_digits, deg_digits + 1, deg_digits + 3, deg_digits + 4];
    let chars: Vec<u8> = digit_at.iter().map(|&i| s.as_bytes()[i]).collect();
    let blanked = chars.iter().rev().take_while(|&&c| c == b' ').count();
    let ambiguity = Ambiguity::from_level(blanked)?;
    if !chars[..4 - blanked].iter().all(u8::is_ascii_digit) {
        return Err(Error::InvalidAprs(format!(
            "spaces may only follow digits in {s:?}"
        )));
    }

    let degrees: u16 = s[..deg_digits]
        .parse()
        .map_err(|_| Error::InvalidAprs(format!("bad degrees in {s:?}")))?;
    let digit = |i: usize| u8::from(chars[i].is_ascii_digit()) * (chars[i].wrapping_sub(b'0'));
    let minutes = digit(0) * 10 + digit(1);
    let centiminutes = digit(2) * 10 + digit(3);
    if minutes >= 60 {
        return Err(Error::InvalidAprs(format!("minutes out of range in {s:?}")));
    }
    Ok((degrees, minutes, centiminutes, negative, ambiguity))
}

fn encode_angle(
    degrees: u16,
    minutes: u8,
    centiminutes: u8,
    negative: bool,
    ambiguity: Ambiguity,
    deg_digits: usize,
    pos_suffix: char,
    neg_suffix: char,
) -> String {
    let text = format!(
        "{degrees:0width$}{minutes:02}.{centiminutes:02}",
        width = deg_digits
    );
    let digit_at = [deg_digits, deg_digits + 1, deg_digits + 3, deg_digits + 4];
    let mut chars: Vec<char> = text.chars().collect();
    for &i in digit_at.iter().rev().take(ambiguity.level()) {
        chars[i] = ' ';
    }
    chars.push(if negative { neg_suffix } else { pos_suffix });
    chars.into_iter().collect()
}

/// An uncompressed latitude.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Latitude {
    /// Whole degrees, 0–90.
    pub degrees: u8,
    /// Whole minutes.
    pub minutes: u8,
    /// Hundredths of a minute.
    pub centiminutes: u8,
    /// Southern hemisphere.
    pub south: bool,
    /// Blanked-digit level.
    pub ambiguity: Ambiguity,
}

impl Latitude {
    /// Decode the 8-character form `DDMM.mmN`.
    pub fn decode(s: &str) -> Result<Self> {
        let (degrees, minutes, centiminutes, south, ambiguity) = decode_angle(s, 2, 'N', 'S')?;
        Ok(Self {
            degrees: degrees as u8,
            minutes,
            centiminutes,
            south,
            ambiguity,
        })
    }

    /// Decimal degrees, negative in the south.
    #[must_use]
    pub fn decimal(&self) -> f64 {
        let value = f64::from(self.degrees)
            + (f64::from(self.minutes) + f64::from(self.centiminutes) / 100.0) / 60.0;
        if self.south { -value } else { value }
    }

    /// Build from decimal degrees.
    #[must_use]
    pub fn from_decimal(value: f64, ambiguity: Ambiguity) -> Self {
        let (degrees, minutes, centiminutes) = split_decimal(value);
        Self {
            degrees: degrees as u8,
            minutes,
            centiminutes,
            south: value < 0.0,
            ambiguity,
        }
    }
}

impl fmt::Display for Latitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_angle(
            u16::from(self.degrees),
            self.minutes,
            self.centiminutes,
            self.south,
            self.ambiguity,
            2,
            'N',
            'S',
        ))
    }
}

/// An uncompressed longitude.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Longitude {
    /// Whole degrees, 0–180.
    pub degrees: u16,
    /// Whole minutes.
    pub minutes: u8,
    /// Hundredths of a minute.
    pub centiminutes: u8,
    /// Western hemisphere.
    pub west: bool,
    /// Blanked-digit level.
    pub ambiguity: Ambiguity,
}

impl Longitude {
    /// Decode the 9-character form `DDDMM.mmE`.
    pub fn decode(s: &str) -> Result<Self> {
        let (degrees, minutes, centiminutes, west, ambiguity) = decode_angle(s, 3, 'E', 'W')?;
        Ok(Self {
            degrees,
            minutes,
            centiminutes,
            west,
            ambiguity,
        })
    }

    /// Decimal degrees, negative in the west.
    #[must_use]
    pub fn decimal(&self) -> f64 {
        let value = f64::from(self.degrees)
            + (f64::from(self.minutes) + f64::from(self.centiminutes) / 100.0) / 60.0;
        if self.west { -value } else { value }
    }

    /// Build from decimal degrees.
    #[must_use]
    pub fn from_decimal(value: f64, ambiguity: Ambiguity) -> Self {
        let (degrees, minutes, centiminutes) = split_decimal(value);
        Self {
            degrees,
            minutes,
            centiminutes,
            west: value < 0.0,
            ambiguity,
        }
    }
}

impl fmt::Display for Longitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_angle(
            self.degrees,
            self.minutes,
            self.centiminutes,
            self.west,
            self.ambiguity,
            3,
            'E',
            'W',
        ))
    }
}

fn split_decimal(value: f64) -> (u16, u8, u8) {
    let total_centiminutes = (value.abs() * 6000.0).round() as u32;
    let degrees = (total_centiminutes / 6000) as u16;
    let rem = total_centiminutes % 6000;
    ((degrees), (rem / 100) as u8, (rem % 100) as u8)
}

/// An uncompressed coordinate pair with its symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UncompressedCoordinates {
    /// Latitude.
    pub lat: Latitude,
    /// Longitude.
    pub lng: Longitude,
    /// Display symbol.
    pub symbol: AprsSymbol,
}

/// Wire length of an uncompressed coordinate.
pub const UNCOMPRESSED_LENGTH: usize = 8 + 9 + 2;

impl UncompressedCoordinates {
    /// Decode the 19-character form.
    pub fn decode(s: &str) -> Result<Self> {
        if s.len() < UNCOMPRESSED_LENGTH || !s.is_ascii() {
            return Err(Error::InvalidAprs("coordinate string too short".into()));
        }
        let symbol = AprsSymbol::new(
            s.chars().nth(8).unwrap(),
            s.chars().nth(UNCOMPRESSED_LENGTH - 1).unwrap(),
        )?;
        Ok(Self {
            lat: Latitude::decode(&s[0..8])?,
            lng: Longitude::decode(&s[9..18])?,
            symbol,
        })
    }
}

impl fmt::Display for UncompressedCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.lat,
            self.symbol.table_ident(),
            self.lng,
            self.symbol.code
        )
    }
}

/// Where a compressed position's fix came from (compression type
/// bits 4–3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NmeaSource {
    /// Not from a listed NMEA sentence.
    Other,
    /// GLL sentence.
    Gll,
    /// GGA sentence; the extension field carries altitude.
    Gga,
    /// RMC sentence; the extension field carries course/speed.
    Rmc,
}

/// Who generated the compressed encoding (compression type bits 2–0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CompressionOrigin {
    Compressed,
    TncBtext,
    Software,
    Tbd,
    Kpc3,
    Pico,
    Other,
    Digipeater,
}

/// The compression type byte of a compressed position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressionType {
    /// GPS fix is current rather than old.
    pub current_fix: bool,
    /// NMEA sentence the fix came from.
    pub nmea_source: NmeaSource,
    /// Origin of the compression.
    pub origin: CompressionOrigin,
}

const CTYPE_FIX: u8 = 0b00100000;
const CTYPE_NMEA_MASK: u8 = 0b00011000;
const CTYPE_ORIGIN_MASK: u8 = 0b00000111;

impl CompressionType {
    fn decode(c: char) -> Result<Self> {
        let byte = (u32::from(c) as u8).wrapping_sub(BYTE_VALUE_OFFSET);
        let nmea_source = match (byte & CTYPE_NMEA_MASK) >> 3 {
            0 => NmeaSource::Other,
            1 => NmeaSource::Gll,
            2 => NmeaSource::Gga,
            _ => NmeaSource::Rmc,
        };
        let origin = match byte & CTYPE_ORIGIN_MASK {
            0 => CompressionOrigin::Compressed,
            1 => CompressionOrigin::TncBtext,
            2 => CompressionOrigin::Software,
            3 => CompressionOrigin::Tbd,
            4 => CompressionOrigin::Kpc3,
            5 => CompressionOrigin::Pico,
            6 => CompressionOrigin::Other,
            _ => CompressionOrigin::Digipeater,
        };
        Ok(Self {
            current_fix: byte & CTYPE_FIX != 0,
            nmea_source,
            origin,
        })
    }

    fn encode(&self) -> char {
        let mut byte = 0u8;
        if self.current_fix {
            byte |= CTYPE_FIX;
        }
        byte |= match self.nmea_source {
            NmeaSource::Other => 0,
            NmeaSource::Gll => 1,
            NmeaSource::Gga => 2,
            NmeaSource::Rmc => 3,
        } << 3;
        byte |= match self.origin {
            CompressionOrigin::Compressed => 0,
            CompressionOrigin::TncBtext => 1,
            CompressionOrigin::Software => 2,
            CompressionOrigin::Tbd => 3,
            CompressionOrigin::Kpc3 => 4,
            CompressionOrigin::Pico => 5,
            CompressionOrigin::Other => 6,
            CompressionOrigin::Digipeater => 7,
        };
        char::from(byte + BYTE_VALUE_OFFSET)
    }
}

/// The two-byte extension of a compressed position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CompressedExtra {
    /// Course in degrees and speed in knots.
    CourseSpeed {
        /// Course, quantised to 4°.
        course: u16,
        /// Speed in knots.
        speed: f64,
    },
    /// Pre-calculated radio range in miles.
    Range {
        /// Range in miles.
        miles: f64,
    },
    /// Altitude in feet (only with a GGA fix).
    Altitude {
        /// Altitude in feet.
        feet: f64,
    },
}

const LAT_SCALE: f64 = 380_926.0;
const LNG_SCALE: f64 = 190_463.0;
const COURSE_SCALE: u16 = 4;
const COURSE_SPEED_MAX: u8 = 89;
const SPEED_RADIX: f64 = 1.08;
const RANGE_HEADER: u8 = 90;
const RANGE_SCALE: f64 = 2.0;
const ALTITUDE_RADIX: f64 = 1.002;

/// A compressed coordinate pair, 13 wire bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompressedCoordinates {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
    /// Display symbol.
    pub symbol: AprsSymbol,
    /// Course/speed, range, or altitude, when sent.
    pub extra: Option<CompressedExtra>,
    /// Compression type byte, when sent.
    pub ctype: Option<CompressionType>,
}

/// Wire length of a compressed coordinate.
pub const COMPRESSED_LENGTH: usize = 13;

impl CompressedCoordinates {
    /// Decode the 13-character form.
    pub fn decode(s: &str) -> Result<Self> {
        if s.len() < COMPRESSED_LENGTH || !s.is_ascii() {
            return Err(Error::InvalidAprs(
                "co-ordinate too short for compressed format".into(),
            ));
        }
        let symbol = AprsSymbol::new(
            s.chars().next().unwrap(),
            s.chars().nth(9).unwrap(),
        )?;
        let lat = 90.0 - decompress(&s[1..5])? as f64 / LAT_SCALE;
        let lng = decompress(&s[5..9])? as f64 / LNG_SCALE - 180.0;

        let (extra, ctype) = if s.as_bytes()[10] == b' ' {
            (None, None)
        } else {
            let ctype = CompressionType::decode(s.chars().nth(12).unwrap())?;
            let c0 = s.as_bytes()[10].wrapping_sub(BYTE_VALUE_OFFSET);
            let c1 = s.as_bytes()[11].wrapping_sub(BYTE_VALUE_OFFSET);
            let extra = if ctype.nmea_source == NmeaSource::Gga {
                Some(CompressedExtra::Altitude {
                    feet: ALTITUDE_RADIX.powf(decompress(&s[10..12])? as f64),
                })
            } else if c0 == RANGE_HEADER {
                Some(CompressedExtra::Range {
                    miles: RANGE_SCALE * SPEED_RADIX.powi(i32::from(c1)),
                })
            } else if c0 <= COURSE_SPEED_MAX {
                Some(CompressedExtra::CourseSpeed {
                    course: u16::from(c0) * COURSE_SCALE,
                    speed: SPEED_RADIX.powi(i32::from(c1)) - 1.0,
                })
            } else {
                None
            };
            (extra, Some(ctype))
        };
        Ok(Self {
            lat,
            lng,
            symbol,
            extra,
            ctype,
        })
    }
}

impl fmt::Display for CompressedCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lat = ((90.0 - self.lat) * LAT_SCALE).abs() as u64;
        let lng = ((self.lng + 180.0) * LNG_SCALE).abs() as u64;
        write!(
            f,
            "{}{}{}{}",
            self.symbol.table_ident(),
            compress(lat, 4),
            compress(lng, 4),
            self.symbol.code
        )?;
        match (&self.extra, &self.ctype) {
            (Some(extra), Some(ctype)) => {
                let cs = match extra {
                    CompressedExtra::CourseSpeed { course, speed } => {
                        let c = (course / COURSE_SCALE) as u8;
                        let s = (speed + 1.0).log(SPEED_RADIX).round() as u8;
                        [c + BYTE_VALUE_OFFSET, s + BYTE_VALUE_OFFSET]
                    }
                    CompressedExtra::Range { miles } => [
                        RANGE_HEADER + BYTE_VALUE_OFFSET,
                        (miles / RANGE_SCALE).log(SPEED_RADIX).round() as u8 + BYTE_VALUE_OFFSET,
                    ],
                    CompressedExtra::Altitude { feet } => {
                        let v = feet.log(ALTITUDE_RADIX).round() as u64;
                        let text = compress(v, 2);
                        let b = text.as_bytes();
                        [b[0], b[1]]
                    }
                };
                write!(
                    f,
                    "{}{}{}",
                    char::from(cs[0]),
                    char::from(cs[1]),
                    ctype.encode()
                )
            }
            // The conventional fill for "no extension".
            _ => write!(f, " sT"),
        }
    }
}

/// Either coordinate encoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Coordinates {
    /// Degrees-and-minutes text form.
    Uncompressed(UncompressedCoordinates),
    /// Base-91 packed form.
    Compressed(CompressedCoordinates),
}

impl Coordinates {
    /// Latitude in decimal degrees.
    #[must_use]
    pub fn latitude(&self) -> f64 {
        match self {
            Coordinates::Uncompressed(c) => c.lat.decimal(),
            Coordinates::Compressed(c) => c.lat,
        }
    }

    /// Longitude in decimal degrees.
    #[must_use]
    pub fn longitude(&self) -> f64 {
        match self {
            Coordinates::Uncompressed(c) => c.lng.decimal(),
            Coordinates::Compressed(c) => c.lng,
        }
    }

    /// The display symbol.
    #[must_use]
    pub fn symbol(&self) -> AprsSymbol {
        match self {
            Coordinates::Uncompressed(c) => c.symbol,
            Coordinates::Compressed(c) => c.symbol,
        }
    }

    /// Decode either coordinate form from the start of `s`, returning
    /// it and the number of characters consumed.
    pub fn decode(s: &str) -> Result<(Self, usize)> {
        // An uncompressed report is at least 19 bytes with decimal
        // points at offsets 4 and 14; anything else is compressed.
        if s.len() >= UNCOMPRESSED_LENGTH
            && s.as_bytes()[4] == b'.'
            && s.as_bytes()[14] == b'.'
        {
            Ok((
                Coordinates::Uncompressed(UncompressedCoordinates::decode(s)?),
                UNCOMPRESSED_LENGTH,
            ))
        } else {
            Ok((
                Coordinates::Compressed(CompressedCoordinates::decode(s)?),
                COMPRESSED_LENGTH,
            ))
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinates::Uncompressed(c) => c.fmt(f),
            Coordinates::Compressed(c) => c.fmt(f),
        }
    }
}

/// A position report.
#[derive(Clone, Debug, PartialEq)]
pub struct AprsPosition {
    /// Report timestamp, when sent.
    pub timestamp: Option<AprsTimestamp>,
    /// Whether the station advertises messaging capability.
    pub messaging: bool,
    /// The coordinates.
    pub coordinates: Coordinates,
    /// Free-text comment.
    pub comment: String,
}

impl AprsPosition {
    /// Decode a position payload (starting at the data type byte).
    pub fn decode(payload: &str) -> Result<Self> {
        if !payload.is_ascii() {
            return Err(Error::InvalidAprs("position payload is not ASCII".into()));
        }
        let code = *payload
            .as_bytes()
            .first()
            .ok_or_else(|| Error::InvalidAprs("empty payload".into()))?;
        let (timestamp, messaging, rest) = match AprsDataType::from_code(code) {
            Some(AprsDataType::Position) => (None, false, &payload[1..]),
            Some(AprsDataType::PositionMessaging) => (None, true, &payload[1..]),
            Some(AprsDataType::PositionTimestamp | AprsDataType::PositionTimestampMessaging) => {
                let messaging = code == AprsDataType::PositionTimestampMessaging.code();
                let (ts, n) = AprsTimestamp::decode(&payload[1..])?;
                (Some(ts), messaging, &payload[1 + n..])
            }
            _ => {
                return Err(Error::InvalidAprs(format!(
                    "not a position frame: {payload:?}"
                )));
            }
        };
        let (coordinates, n) = Coordinates::decode(rest)?;
        Ok(Self {
            timestamp,
            messaging,
            coordinates,
            comment: rest[n..].to_string(),
        })
    }

    /// Encode as a payload string, data type byte included.
    #[must_use]
    pub fn encode(&self) -> String {
        let code = match (&self.timestamp, self.messaging) {
            (None, false) => AprsDataType::Position,
            (None, true) => AprsDataType::PositionMessaging,
            (Some(_), false) => AprsDataType::PositionTimestamp,
            (Some(_), true) => AprsDataType::PositionTimestampMessaging,
        };
        let mut out = String::new();
        out.push(char::from(code.code()));
        if let Some(ts) = &self.timestamp {
            out.push_str(&ts.to_string());
        }
        out.push_str(&self.coordinates.to_string());
        out.push_str(&self.comment);
        out
    }
}
