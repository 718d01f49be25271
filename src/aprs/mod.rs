/*! APRS: the Automatic Packet Reporting System, carried in AX.25 UI
frames with PID `0xF0`.

The codec layer ([`frame`], [`message`], [`position`], [`status`],
[`object`], [`datetime`], [`symbol`], [`compression`]) is pure; the
service layer ([`interface`]) adds deduplication, addressee routing and
confirmable messaging, and [`digipeater`] implements WIDEn-N flood
digipeating on top of it.
*/
pub mod compression;
pub mod datatype;
pub mod datetime;
pub mod digipeater;
pub mod frame;
pub mod interface;
pub mod message;
pub mod object;
pub mod position;
pub mod status;
pub mod symbol;

pub use datatype::AprsDataType;
pub use digipeater::AprsDigipeater;
pub use frame::{AprsData, aprs_frame};
pub use interface::{AprsEvent, AprsInterface, MessageHandle, MessageState};
pub use message::{AprsMessage, ReplyAck};
pub use object::AprsObject;
pub use position::{AprsPosition, Coordinates};
pub use status::AprsStatus;
pub use symbol::AprsSymbol;
