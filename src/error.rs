//! Error taxonomy for the meter dialogue.
//!
//! Parsing, protocol and timeout faults are recoverable: the link is noisy
//! by nature, so the driver drops the readout, returns to the initial state
//! and retries after the polling delay. Fatal errors are reserved for
//! conditions under which no future dialogue turn could succeed.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::iec62056::message::MessageKind;

/// Failure turning wire bytes into protocol values.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("frame does not match the {kind} message grammar: {frame:?}")]
    Frame { kind: MessageKind, frame: Vec<u8> },
    #[error("block check mismatch: computed {computed:#04x}, received {received:#04x}")]
    BlockCheck { computed: u8, received: u8 },
    #[error("line does not match the data set grammar: {line:?}")]
    DataSetLine { line: Vec<u8> },
    #[error("address is not an OBIS id: {address:?}")]
    ObisAddress { address: String },
    #[error("value {value:?} is not a valid {expected}")]
    Value { value: String, expected: &'static str },
}

/// Failure of one dialogue turn in the serial driver.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out waiting for the meter")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DriverError {
    /// Whether the driver may recover by restarting the dialogue.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DriverError::Parse(_) | DriverError::Protocol(_) | DriverError::Timeout(_) => true,
            DriverError::Io(err) => !matches!(
                err.kind(),
                io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
        }
    }
}

/// Top-level failure of the monitor service.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("MQTT client failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_timeout_errors_are_recoverable() {
        let err = DriverError::Protocol("unexpected message".into());
        assert!(err.is_recoverable());
        let err = DriverError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_lost_port_is_fatal() {
        let err = DriverError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(!err.is_recoverable());
        let err = DriverError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert!(!err.is_recoverable());
    }
}
