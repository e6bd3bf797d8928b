use std::io;

use crate::message::Message;
use crate::ofp_header::{OfpHeader, Xid};
use crate::openflow::MsgCode;

#[derive(Debug, Fail)]
pub enum OfpSerializationError {
    #[fail(display = "IO Error: {}", error)]
    IoError { error: io::Error },
    #[fail(display = "Unexpected value '{}' at field '{}' of '{}'", value, field, message)]
    UnexpectedValueError {
        value: String,
        field: String,
        message: String,
    },
    #[fail(display = "Truncated buffer: needed {} bytes, {} available", needed, available)]
    Truncated { needed: usize, available: usize },
    #[fail(display = "Unsupported OpenFlow version: {}", version)]
    UnsupportedVersion { version: u8 },
    #[fail(display = "Unsupported OpenFlow message type code {} for version: {}", code, version)]
    UnsupportedTypeCode { version: u8, code: u8 },
    #[fail(display = "Unsupported OpenFlow message {} for version: {}", code, version)]
    UnsupportedMessageCode { version: u8, code: MsgCode },
    #[fail(display = "Message {} exceeds the maximum OpenFlow length ({} bytes)", code, length)]
    TooLong { code: MsgCode, length: usize },
}

impl From<io::Error> for OfpSerializationError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            // Cursor reads past the end of a body surface as UnexpectedEof.
            OfpSerializationError::Truncated {
                needed: 0,
                available: 0,
            }
        } else {
            OfpSerializationError::IoError { error }
        }
    }
}

impl OfpSerializationError {
    pub fn unexpected<V: ToString>(value: V, field: &str, message: &str) -> Self {
        OfpSerializationError::UnexpectedValueError {
            value: value.to_string(),
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Wire Codec
///
/// Boundary between the connection engine and the byte-level representation of messages.
/// The engine never builds message bytes itself; everything goes through this trait.
pub trait WireCodec: Send + Sync {
    /// Return a marshaled buffer containing an OpenFlow header and the message `msg`.
    fn encode(&self, version: u8, xid: Xid, msg: &Message) -> Result<Vec<u8>, OfpSerializationError>;

    /// Parse a message body for the given header. `body` excludes the header bytes.
    fn parse(&self, header: &OfpHeader, body: &[u8]) -> Result<Message, OfpSerializationError>;
}
