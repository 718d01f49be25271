//! APRS status reports: `>` followed by an optional `DDHHMMz`
//! timestamp and free text.

use crate::aprs::datatype::AprsDataType;
use crate::aprs::datetime::AprsTimestamp;
use crate::{Error, Result};

/// A status report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AprsStatus {
    /// Timestamp; only the zulu day/hour/minute form is permitted
    /// here.
    pub timestamp: Option<AprsTimestamp>,
    /// Status text.
    pub text: String,
}

impl AprsStatus {
    /// Decode a status payload (starting at the `>` type byte).
    pub fn decode(payload: &str) -> Result<Self> {
        if !payload.is_ascii() || payload.as_bytes().first() != Some(&AprsDataType::Status.code())
        {
            return Err(Error::InvalidAprs(format!("not a status frame: {payload:?}")));
        }
        let rest = &payload[1..];
        // A status timestamp must be DDHHMMz; anything else is text.
        let (timestamp, rest) = match AprsTimestamp::decode(rest) {
            Ok((ts @ AprsTimestamp::DayHourMinuteUtc { .. }, n)) => (Some(ts), &rest[n..]),
            _ => (None, rest),
        };
        Ok(Self {
            timestamp,
            text: rest.to_string(),
        })
    }

    /// Encode as a payload string, type byte included.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::from(">");
        if let Some(ts) = &self.timestamp {
            out.push_str(&ts.to_string());
        }
        out.push_str(&self.text);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_plain() {
        let status = AprsStatus::decode(">Net Control Center").unwrap();
        assert!(status.timestamp.is_none());
        assert_eq!(status.text, "Net Control Center");
        assert_eq!(status.encode(), ">Net Control Center");
    }

    #[test]
    fn decode_timestamped() {
        let status = AprsStatus::decode(">092345zNet Control Center").unwrap();
        assert_eq!(
            status.timestamp,
            Some(AprsTimestamp::DayHourMinuteUtc {
                day: 9,
                hour: 23,
                minute: 45
            })
        );
        assert_eq!(status.text, "Net Control Center");
        assert_eq!(status.encode(), ">092345zNet Control Center");
    }

    #[test]
    fn local_timestamp_is_just_text() {
        let status = AprsStatus::decode(">092345/Net Control Center").unwrap();
        assert!(status.timestamp.is_none());
        assert_eq!(status.text, "092345/Net Control Center");
    }

    #[test]
    fn rejects_other_types() {
        assert!(AprsStatus::decode("!4903.50N/07201.75W-").is_err());
    }
}
