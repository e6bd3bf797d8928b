use std::io;

use crate::datapath::DatapathId;
use crate::ofp_header::Xid;
use crate::ofp_message::OfpSerializationError;

/// Errors surfaced by the controller to its callers.
#[derive(Debug, Fail)]
pub enum ControllerError {
    #[fail(display = "Invalid argument: {}", reason)]
    InvalidArgument { reason: String },
    #[fail(display = "Datapath {} not found", dpid)]
    NotFound { dpid: DatapathId },
    #[fail(display = "Port {} not found on datapath {}", port, dpid)]
    PortNotFound { dpid: DatapathId, port: u32 },
    #[fail(display = "A packet sequencer is already registered")]
    SequencerAlreadyRegistered,
    #[fail(display = "Transaction id {} already pending on datapath {}", xid, dpid)]
    DuplicateXid { dpid: DatapathId, xid: Xid },
    #[fail(display = "Send to {} failed: {}", dpid, reason)]
    SendFailed { dpid: DatapathId, reason: String },
    #[fail(display = "Serialization error: {}", error)]
    Serialization { error: OfpSerializationError },
    #[fail(display = "Timed out waiting for a reply")]
    Timeout,
    #[fail(display = "Datapath {} disconnected", dpid)]
    Disconnected { dpid: DatapathId },
    #[fail(display = "Request {} on datapath {} aged out", xid, dpid)]
    AgedOut { dpid: DatapathId, xid: Xid },
    #[fail(display = "IO Error: {}", error)]
    Io { error: io::Error },
    #[fail(display = "Controller is not accepting connections")]
    NotListening,
}

impl ControllerError {
    pub fn invalid<S: Into<String>>(reason: S) -> ControllerError {
        ControllerError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        match self {
            ControllerError::InvalidArgument { .. } => true,
            _ => false,
        }
    }
}

impl From<OfpSerializationError> for ControllerError {
    fn from(error: OfpSerializationError) -> Self {
        ControllerError::Serialization { error }
    }
}

impl From<io::Error> for ControllerError {
    fn from(error: io::Error) -> Self {
        ControllerError::Io { error }
    }
}
