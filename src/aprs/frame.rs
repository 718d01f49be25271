/*! Dissection of APRS payloads out of AX.25 UI frames.

APRS traffic is UI frames with PID `0xF0` (no layer 3). The first
payload byte selects the data format; [`AprsData::decode`] dispatches
on it and returns `None` for anything that isn't APRS or doesn't parse
— the caller keeps the frame as a plain UI frame in that case, exactly
as a digipeater would.
*/
use log::debug;

use crate::address::{AX25Address, AX25Path};
use crate::aprs::datatype::AprsDataType;
use crate::aprs::message::AprsMessage;
use crate::aprs::object::AprsObject;
use crate::aprs::position::AprsPosition;
use crate::aprs::status::AprsStatus;
use crate::frame::{AX25Frame, AX25FrameBody, AX25FrameHeader, UnnumberedFrame, pid};

/// A dissected APRS payload.
#[derive(Clone, Debug, PartialEq)]
pub enum AprsData {
    /// A directed message, ACK, or REJ.
    Message(AprsMessage),
    /// A position report.
    Position(AprsPosition),
    /// A status report.
    Status(AprsStatus),
    /// An object report.
    Object(AprsObject),
}

impl AprsData {
    /// Dissect an AX.25 frame as APRS. Returns `None` when the frame
    /// is not a UI frame with the APRS PID, or its payload doesn't
    /// parse as the data type it announces.
    #[must_use]
    pub fn decode(frame: &AX25Frame) -> Option<Self> {
        let AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedInformation {
            pid: frame_pid,
            payload,
            ..
        }) = &frame.body
        else {
            return None;
        };
        if *frame_pid != pid::NO_L3 || payload.is_empty() || !payload.is_ascii() {
            debug!("frame is not APRS: {frame}");
            return None;
        }
        let text = str::from_utf8(payload).ok()?;
        let result = match AprsDataType::from_code(payload[0]) {
            Some(AprsDataType::Message) => AprsMessage::decode(text).map(AprsData::Message),
            Some(
                AprsDataType::Position
                | AprsDataType::PositionMessaging
                | AprsDataType::PositionTimestamp
                | AprsDataType::PositionTimestampMessaging,
            ) => AprsPosition::decode(text).map(AprsData::Position),
            Some(AprsDataType::Status) => AprsStatus::decode(text).map(AprsData::Status),
            Some(AprsDataType::Object) => AprsObject::decode(text).map(AprsData::Object),
            _ => {
                debug!("no decoder for APRS data type {:?}", char::from(payload[0]));
                return None;
            }
        };
        match result {
            Ok(data) => Some(data),
            Err(e) => {
                // Not decodable; leave the frame as-is.
                debug!("failed to decode as APRS: {e}");
                None
            }
        }
    }

    /// The payload text this data encodes to.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            AprsData::Message(m) => m.encode(),
            AprsData::Position(p) => p.encode(),
            AprsData::Status(s) => s.encode(),
            AprsData::Object(o) => o.encode(),
        }
    }

    /// Wrap this data in a UI frame.
    #[must_use]
    pub fn to_frame(
        &self,
        destination: AX25Address,
        source: AX25Address,
        repeaters: AX25Path,
    ) -> AX25Frame {
        aprs_frame(destination, source, repeaters, self.encode().into_bytes())
    }
}

/// Build an APRS UI frame around a raw payload.
#[must_use]
pub fn aprs_frame(
    destination: AX25Address,
    source: AX25Address,
    repeaters: AX25Path,
    payload: Vec<u8>,
) -> AX25Frame {
    AX25Frame::new(
        AX25FrameHeader::new(destination, source, repeaters, true),
        AX25FrameBody::Unnumbered(UnnumberedFrame::UnnumberedInformation {
            pf: false,
            pid: pid::NO_L3,
            payload,
        }),
    )
}
