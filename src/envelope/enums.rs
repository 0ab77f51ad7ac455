//! Core enumerations for the envelope protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of envelope, driving the per-request state machine.
///
/// `OK` and `EARLY_REPLY` keep a request running; `ERROR` and `EARLY_EXIT`
/// are terminal and no further task node processes the request. On the wire
/// the type travels as its numeric code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MessageType {
    #[default]
    Ok,
    Error,
    EarlyReply,
    EarlyExit,
}

impl MessageType {
    /// Wire code (`OK=0, ERROR=1, EARLY_REPLY=2, EARLY_EXIT=3`).
    pub fn as_i32(self) -> i32 {
        match self {
            MessageType::Ok => 0,
            MessageType::Error => 1,
            MessageType::EarlyReply => 2,
            MessageType::EarlyExit => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageType::Error | MessageType::EarlyExit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Ok => "OK",
            MessageType::Error => "ERROR",
            MessageType::EarlyReply => "EARLY_REPLY",
            MessageType::EarlyExit => "EARLY_EXIT",
        }
    }
}

impl TryFrom<i32> for MessageType {
    type Error = crate::types::Error;

    fn try_from(code: i32) -> Result<Self, crate::types::Error> {
        match code {
            0 => Ok(MessageType::Ok),
            1 => Ok(MessageType::Error),
            2 => Ok(MessageType::EarlyReply),
            3 => Ok(MessageType::EarlyExit),
            other => Err(crate::types::Error::decode(format!(
                "unknown message type code {other}"
            ))),
        }
    }
}

impl From<MessageType> for i32 {
    fn from(message_type: MessageType) -> Self {
        message_type.as_i32()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        for ty in [
            MessageType::Ok,
            MessageType::Error,
            MessageType::EarlyReply,
            MessageType::EarlyExit,
        ] {
            assert_eq!(MessageType::try_from(ty.as_i32()).unwrap(), ty);
        }
        assert!(MessageType::try_from(7).is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MessageType::Ok.is_terminal());
        assert!(!MessageType::EarlyReply.is_terminal());
        assert!(MessageType::Error.is_terminal());
        assert!(MessageType::EarlyExit.is_terminal());
    }

    #[test]
    fn test_serialized_as_code() {
        assert_eq!(serde_json::to_string(&MessageType::EarlyReply).unwrap(), "2");
        let ty: MessageType = serde_json::from_str("3").unwrap();
        assert_eq!(ty, MessageType::EarlyExit);
        assert!(serde_json::from_str::<MessageType>("9").is_err());
        assert!(serde_json::from_str::<MessageType>("\"OK\"").is_err());
    }

    #[test]
    fn test_msgpack_code_on_the_wire() {
        let bytes = rmp_serde::to_vec(&MessageType::Error).unwrap();
        assert_eq!(bytes, [0x01]);
        let ty: MessageType = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(ty, MessageType::Error);
    }
}
