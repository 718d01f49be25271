/*! APRS timestamps.

APRS timestamps carry only partial calendar information, so decoding
keeps exactly what was sent and can round-trip it. To place one on a
real calendar, [`AprsTimestamp::resolve`] interprets it relative to a
reference instant.
*/
use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::{Error, Result};

/// A decoded APRS timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AprsTimestamp {
    /// `DDHHMMz`: day/hour/minute, UTC.
    DayHourMinuteUtc {
        /// Day of month.
        day: u8,
        /// Hour.
        hour: u8,
        /// Minute.
        minute: u8,
    },
    /// `DDHHMM/`: day/hour/minute in the sender's local time.
    DayHourMinuteLocal {
        /// Day of month.
        day: u8,
        /// Hour.
        hour: u8,
        /// Minute.
        minute: u8,
    },
    /// `HHMMSSh`: hour/minute/second, UTC.
    HourMinuteSecond {
        /// Hour.
        hour: u8,
        /// Minute.
        minute: u8,
        /// Second.
        second: u8,
    },
    /// `MMDDHHMM`: month/day/hour/minute, UTC.
    MonthDayHourMinute {
        /// Month.
        month: u8,
        /// Day of month.
        day: u8,
        /// Hour.
        hour: u8,
        /// Minute.
        minute: u8,
    },
}

fn two_digits(s: &str, at: usize) -> Result<u8> {
    s.get(at..at + 2)
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| Error::InvalidAprs(format!("bad timestamp digits in {s:?}")))
}

impl AprsTimestamp {
    /// Decode a timestamp from the start of `s`, returning it and the
    /// number of characters consumed (7, or 8 for the month form).
    pub fn decode(s: &str) -> Result<(Self, usize)> {
        if s.len() < 7 {
            return Err(Error::InvalidAprs("timestamp string too short".into()));
        }
        match s.as_bytes()[6] {
            b'z' | b'/' => {
                let day = two_digits(s, 0)?;
                let hour = two_digits(s, 2)?;
                let minute = two_digits(s, 4)?;
                let ts = if s.as_bytes()[6] == b'z' {
                    AprsTimestamp::DayHourMinuteUtc { day, hour, minute }
                } else {
                    AprsTimestamp::DayHourMinuteLocal { day, hour, minute }
                };
                Ok((ts, 7))
            }
            b'h' => Ok((
                AprsTimestamp::HourMinuteSecond {
                    hour: two_digits(s, 0)?,
                    minute: two_digits(s, 2)?,
                    second: two_digits(s, 4)?,
                },
                7,
            )),
            _ if s.len() >= 8 => Ok((
                AprsTimestamp::MonthDayHourMinute {
                    month: two_digits(s, 0)?,
                    day: two_digits(s, 2)?,
                    hour: two_digits(s, 4)?,
                    minute: two_digits(s, 6)?,
                },
                8,
            )),
            _ => Err(Error::InvalidAprs(format!(
                "timestamp format not recognised: {s:?}"
            ))),
        }
    }

    /// Place this timestamp on the calendar, interpreting it as the
    /// most recent instant not after `reference`. Local-time stamps
    /// resolve to `None`: the sender's UTC offset is unknown.
    #[must_use]
    pub fn resolve(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let build = |year: i32, month: u32, day: u32, h: u8, m: u8, s: u8| {
            Utc.with_ymd_and_hms(
                year,
                month,
                day,
                u32::from(h),
                u32::from(m),
                u32::from(s),
            )
            .single()
        };
        match *self {
            AprsTimestamp::DayHourMinuteLocal { .. } => None,
            AprsTimestamp::DayHourMinuteUtc { day, hour, minute } => {
                // Walk back at most one month looking for the day.
                for offset in 0..2 {
                    let base = reference
                        .date_naive()
                        .checked_sub_months(chrono::Months::new(offset))?;
                    if let Some(t) =
                        build(base.year(), base.month(), u32::from(day), hour, minute, 0)
                    {
                        if t <= reference {
                            return Some(t);
                        }
                    }
                }
                None
            }
            AprsTimestamp::HourMinuteSecond {
                hour,
                minute,
                second,
            } => {
                for offset in 0..2i64 {
                    let base = reference.date_naive() - chrono::Days::new(offset as u64);
                    if let Some(t) =
                        build(base.year(), base.month(), base.day(), hour, minute, second)
                    {
                        if t <= reference {
                            return Some(t);
                        }
                    }
                }
                None
            }
            AprsTimestamp::MonthDayHourMinute {
                month,
                day,
                hour,
                minute,
            } => {
                for offset in 0..2 {
                    let year = reference.year() - offset;
                    if let Some(t) =
                        build(year, u32::from(month), u32::from(day), hour, minute, 0)
                    {
                        if t <= reference {
                            return Some(t);
                        }
                    }
                }
                None
            }
        }
    }
}

impl fmt::Display for AprsTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            AprsTimestamp::DayHourMinuteUtc { day, hour, minute } => {
                write!(f, "{day:02}{hour:02}{minute:02}z")
            }
            AprsTimestamp::DayHourMinuteLocal { day, hour, minute } => {
                write!(f, "{day:02}{hour:02}{minute:02}/")
            }
            AprsTimestamp::HourMinuteSecond {
                hour,
                minute,
                second,
            } => write!(f, "{hour:02}{minute:02}{second:02}h"),
            AprsTimestamp::MonthDayHourMinute {
                month,
                day,
                hour,
                minute,
            } => write!(f, "{month:02}{day:02}{hour:02}{minute:02}"),
        }
    }
}
