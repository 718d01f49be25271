/*! APRS messages: directed text, ACK/REJ responses, and the APRS 1.1
reply-ACK convention.

The payload grammar is

```text
:ADDRESSEE:text{msgid}replyack
```

where the addressee is space-padded to nine characters, the text runs
to 67 characters, and everything from `{` on is optional. A trailing
`}` after the message ID advertises reply-ACK capability; `}<msgid>`
acknowledges that message inside the reply itself.
*/
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::address::AX25Address;
use crate::{Error, Result};

/// Longest message text carried in a single frame.
pub const MAX_MESSAGE_LEN: usize = 67;
/// Longest message ID.
pub const MAX_MSGID_LEN: usize = 5;

fn msgid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([0-9A-Za-z]+)(\}[0-9A-Za-z]*)?(\r?)$").unwrap())
}

fn ackrej_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(ack|rej)([0-9A-Za-z]+)$").unwrap())
}

/// Reply-ACK state of an outgoing or decoded message.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ReplyAck {
    /// No reply-ACK involvement.
    #[default]
    None,
    /// The sender advertises it will ACK inside its reply (`{msgid}`).
    Capable,
    /// This message embeds an acknowledgement of the named message ID
    /// (`{msgid}ackid`).
    Replying(String),
}

/// A decoded APRS message payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AprsMessage {
    /// A directed text message.
    Data {
        /// Station the message is for.
        addressee: AX25Address,
        /// Message text.
        message: String,
        /// Message ID, when the sender wants confirmation.
        msgid: Option<String>,
        /// Reply-ACK marker.
        replyack: ReplyAck,
    },
    /// `ack<msgid>`.
    Ack {
        /// Station the acknowledgement is for.
        addressee: AX25Address,
        /// The confirmed message ID.
        msgid: String,
    },
    /// `rej<msgid>`.
    Rej {
        /// Station the rejection is for.
        addressee: AX25Address,
        /// The rejected message ID.
        msgid: String,
    },
}

impl AprsMessage {
    /// Build a directed message, validating the message ID length.
    pub fn data(
        addressee: AX25Address,
        message: &str,
        msgid: Option<&str>,
        replyack: ReplyAck,
    ) -> Result<Self> {
        if let Some(msgid) = msgid {
            if msgid.len() > MAX_MSGID_LEN || msgid.is_empty() {
                return Err(Error::InvalidAprs(format!("bad message ID {msgid:?}")));
            }
        }
        if msgid.is_none() && replyack != ReplyAck::None {
            return Err(Error::InvalidAprs(
                "reply-ACK requires a message ID".into(),
            ));
        }
        Ok(AprsMessage::Data {
            addressee: addressee.normalised(),
            message: message.to_string(),
            msgid: msgid.map(str::to_string),
            replyack,
        })
    }

    /// The station this message is addressed to.
    #[must_use]
    pub fn addressee(&self) -> &AX25Address {
        match self {
            AprsMessage::Data { addressee, .. }
            | AprsMessage::Ack { addressee, .. }
            | AprsMessage::Rej { addressee, .. } => addressee,
        }
    }

    /// The message ID, if any.
    #[must_use]
    pub fn msgid(&self) -> Option<&str> {
        match self {
            AprsMessage::Data { msgid, .. } => msgid.as_deref(),
            AprsMessage::Ack { msgid, .. } | AprsMessage::Rej { msgid, .. } => Some(msgid),
        }
    }

    /// Decode a message payload (starting at the `:` type byte).
    pub fn decode(payload: &str) -> Result<Self> {
        let bytes = payload.as_bytes();
        if !payload.is_ascii() || bytes.len() < 11 || bytes[0] != b':' || bytes[10] != b':' {
            return Err(Error::InvalidAprs(format!("not a message frame: {payload:?}")));
        }
        let addressee = AX25Address::from_str(payload[1..10].trim())?.normalised();
        let message = &payload[11..];

        if let Some(m) = ackrej_re().captures(message) {
            let msgid = m[2].to_string();
            return Ok(if &m[1] == "ack" {
                AprsMessage::Ack { addressee, msgid }
            } else {
                AprsMessage::Rej { addressee, msgid }
            });
        }

        let (message, msgid, replyack) = match msgid_re().captures(message) {
            Some(m) => {
                let msgid = m[1].to_string();
                let replyack = match m.get(2) {
                    None => ReplyAck::None,
                    Some(tail) if tail.as_str() == "}" => ReplyAck::Capable,
                    Some(tail) => ReplyAck::Replying(tail.as_str()[1..].to_string()),
                };
                let text = &message[..m.get(0).unwrap().start()];
                (text, Some(msgid), replyack)
            }
            None => (message, None, ReplyAck::None),
        };

        Ok(AprsMessage::Data {
            addressee,
            message: message.to_string(),
            msgid,
            replyack,
        })
    }

    /// Encode as a payload string, `:` type byte included. Message
    /// text is truncated to [`MAX_MESSAGE_LEN`].
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            AprsMessage::Data {
                addressee,
                message,
                msgid,
                replyack,
            } => {
                let text: String = message.chars().take(MAX_MESSAGE_LEN).collect();
                let mut out = format!(":{:<9}:{}", addressee.to_string(), text);
                if let Some(msgid) = msgid {
                    out.push('{');
                    out.push_str(msgid);
                    match replyack {
                        ReplyAck::None => {}
                        ReplyAck::Capable => out.push('}'),
                        ReplyAck::Replying(ackid) => {
                            out.push('}');
                            out.push_str(ackid);
                        }
                    }
                }
                out
            }
            AprsMessage::Ack { addressee, msgid } => {
                format!(":{:<9}:ack{}", addressee.to_string(), msgid)
            }
            AprsMessage::Rej { addressee, msgid } => {
                format!(":{:<9}:rej{}", addressee.to_string(), msgid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::addr;

    #[test]
    fn decode_plain_message() {
        let msg = AprsMessage::decode(":VK4MDL-7 :Hi").unwrap();
        assert_eq!(
            msg,
            AprsMessage::Data {
                addressee: addr("VK4MDL-7"),
                message: "Hi".into(),
                msgid: None,
                replyack: ReplyAck::None,
            }
        );
    }

    #[test]
    fn decode_message_with_msgid() {
        let msg = AprsMessage::decode(":VK4MDL-7 :Hi{14").unwrap();
        assert_eq!(msg.msgid(), Some("14"));
        let AprsMessage::Data {
            message, replyack, ..
        } = msg
        else {
            panic!("wrong variant");
        };
        assert_eq!(message, "Hi");
        assert_eq!(replyack, ReplyAck::None);
    }

    #[test]
    fn decode_replyack_capable() {
        let msg = AprsMessage::decode(":VK4MDL-7 :Hi{14}").unwrap();
        let AprsMessage::Data { replyack, .. } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(replyack, ReplyAck::Capable);
    }

    #[test]
    fn decode_embedded_replyack() {
        let msg = AprsMessage::decode(":VK4MDL-7 :Fine thanks{14}3").unwrap();
        let AprsMessage::Data {
            message,
            msgid,
            replyack,
            ..
        } = msg
        else {
            panic!("wrong variant");
        };
        assert_eq!(message, "Fine thanks");
        assert_eq!(msgid.as_deref(), Some("14"));
        assert_eq!(replyack, ReplyAck::Replying("3".into()));
    }

    #[test]
    fn decode_ack_and_rej() {
        assert_eq!(
            AprsMessage::decode(":VK4MSL-10:ack2").unwrap(),
            AprsMessage::Ack {
                addressee: addr("VK4MSL-10"),
                msgid: "2".into()
            }
        );
        assert_eq!(
            AprsMessage::decode(":VK4MSL-10:rej17").unwrap(),
            AprsMessage::Rej {
                addressee: addr("VK4MSL-10"),
                msgid: "17".into()
            }
        );
    }

    #[test]
    fn decode_rejects_non_messages() {
        assert!(AprsMessage::decode("!4903.50N/07201.75W-").is_err());
        assert!(AprsMessage::decode(":short").is_err());
    }

    #[test]
    fn encode_pads_addressee() {
        let msg = AprsMessage::data(addr("VK4MDL-7"), "Hi", Some("1"), ReplyAck::None).unwrap();
        assert_eq!(msg.encode(), ":VK4MDL-7 :Hi{1");
    }

    #[test]
    fn encode_truncates_text() {
        let long = "x".repeat(80);
        let msg = AprsMessage::data(addr("VK4BWI"), &long, None, ReplyAck::None).unwrap();
        let encoded = msg.encode();
        assert_eq!(encoded.len(), 11 + MAX_MESSAGE_LEN);
    }

    #[test]
    fn encode_replyack_forms() {
        let msg =
            AprsMessage::data(addr("VK4BWI"), "hi", Some("2"), ReplyAck::Capable).unwrap();
        assert_eq!(msg.encode(), ":VK4BWI   :hi{2}");
        let msg = AprsMessage::data(
            addr("VK4BWI"),
            "hi",
            Some("2"),
            ReplyAck::Replying("9".into()),
        )
        .unwrap();
        assert_eq!(msg.encode(), ":VK4BWI   :hi{2}9");
    }

    #[test]
    fn msgid_too_long_rejected() {
        assert!(
            AprsMessage::data(addr("VK4BWI"), "hi", Some("123456"), ReplyAck::None).is_err()
        );
    }

    #[test]
    fn roundtrip() {
        for text in [
            ":VK4MDL-7 :Hi{1",
            ":VK4MDL-7 :Hi there{14}",
            ":VK4MDL-7 :Fine{14}3",
            ":VK4MSL-10:ack1",
            ":BLN1     :never mind",
        ] {
            let msg = AprsMessage::decode(text).unwrap();
            assert_eq!(msg.encode(), text, "for {text:?}");
        }
    }
}
