//! APRS data type identifiers: the first byte of the information
//! field selects the payload format (APRS 1.0.1 page 17; unused and
//! reserved codes are not listed).

/// An APRS data type code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AprsDataType {
    MicEBeta0,
    MicEOldBeta0,
    Position,
    PeetBrosWx1,
    RawGprsUlt2k,
    AgreloDfjr,
    ReservedMap,
    MicEOld,
    Item,
    PeetBrosWx2,
    TestData,
    PositionTimestamp,
    Message,
    Object,
    StationCapabilities,
    PositionMessaging,
    Status,
    Query,
    PositionTimestampMessaging,
    Telemetry,
    Maidenhead,
    Weather,
    MicE,
    UserDefined,
    ThirdParty,
}

impl AprsDataType {
    /// The identifier byte for this data type.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            AprsDataType::MicEBeta0 => 0x1c,
            AprsDataType::MicEOldBeta0 => 0x1d,
            AprsDataType::Position => b'!',
            AprsDataType::PeetBrosWx1 => b'#',
            AprsDataType::RawGprsUlt2k => b'$',
            AprsDataType::AgreloDfjr => b'%',
            AprsDataType::ReservedMap => b'&',
            AprsDataType::MicEOld => b'\'',
            AprsDataType::Item => b')',
            AprsDataType::PeetBrosWx2 => b'*',
            AprsDataType::TestData => b',',
            AprsDataType::PositionTimestamp => b'/',
            AprsDataType::Message => b':',
            AprsDataType::Object => b';',
            AprsDataType::StationCapabilities => b'<',
            AprsDataType::PositionMessaging => b'=',
            AprsDataType::Status => b'>',
            AprsDataType::Query => b'?',
            AprsDataType::PositionTimestampMessaging => b'@',
            AprsDataType::Telemetry => b'T',
            AprsDataType::Maidenhead => b'[',
            AprsDataType::Weather => b'_',
            AprsDataType::MicE => b'`',
            AprsDataType::UserDefined => b'{',
            AprsDataType::ThirdParty => b'}',
        }
    }

    /// Look up the data type for an identifier byte.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        use AprsDataType::*;
        let all = [
            MicEBeta0,
            MicEOldBeta0,
            Position,
            PeetBrosWx1,
            RawGprsUlt2k,
            AgreloDfjr,
            ReservedMap,
            MicEOld,
            Item,
            PeetBrosWx2,
            TestData,
            PositionTimestamp,
            Message,
            Object,
            StationCapabilities,
            PositionMessaging,
            Status,
            Query,
            PositionTimestampMessaging,
            Telemetry,
            Maidenhead,
            Weather,
            MicE,
            UserDefined,
            ThirdParty,
        ];
        all.into_iter().find(|t| t.code() == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_lookup_roundtrip() {
        for code in 0..=255u8 {
            if let Some(t) = AprsDataType::from_code(code) {
                assert_eq!(t.code(), code);
            }
        }
        assert_eq!(AprsDataType::from_code(b':'), Some(AprsDataType::Message));
        assert_eq!(AprsDataType::from_code(b'~'), None);
    }
}
