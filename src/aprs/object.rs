//! APRS objects: named, timestamped positions placed on the map by a
//! reporting station.

use crate::aprs::datatype::AprsDataType;
use crate::aprs::datetime::AprsTimestamp;
use crate::aprs::position::Coordinates;
use crate::{Error, Result};

/// An object report.
#[derive(Clone, Debug, PartialEq)]
pub struct AprsObject {
    /// Object name, at most nine characters.
    pub name: String,
    /// Live (`*`) or killed (`_`).
    pub live: bool,
    /// Report timestamp.
    pub timestamp: AprsTimestamp,
    /// Object coordinates.
    pub coordinates: Coordinates,
    /// Free-text comment.
    pub comment: String,
}

impl AprsObject {
    /// Decode an object payload (starting at the `;` type byte).
    pub fn decode(payload: &str) -> Result<Self> {
        if !payload.is_ascii()
            || payload.as_bytes().first() != Some(&AprsDataType::Object.code())
            || payload.len() < 11
        {
            return Err(Error::InvalidAprs(format!("not an object frame: {payload:?}")));
        }
        let name = payload[1..10].trim_end().to_string();
        let live = match payload.as_bytes()[10] {
            b'*' => true,
            b'_' => false,
            other => {
                return Err(Error::InvalidAprs(format!(
                    "bad object live/killed flag {:?}",
                    char::from(other)
                )));
            }
        };
        let (timestamp, n) = AprsTimestamp::decode(&payload[11..])?;
        let rest = &payload[11 + n..];
        let (coordinates, n) = Coordinates::decode(rest)?;
        Ok(Self {
            name,
            live,
            timestamp,
            coordinates,
            comment: rest[n..].to_string(),
        })
    }

    /// Encode as a payload string, type byte included.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            ";{:<9}{}{}{}{}",
            self.name,
            if self.live { '*' } else { '_' },
            self.timestamp,
            self.coordinates,
            self.comment
        )
    }
}
