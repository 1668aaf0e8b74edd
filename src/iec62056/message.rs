//! The four IEC 62056-21 Mode C wire messages.
//!
//! Every message starts with a fixed initiator byte and runs to a fixed
//! terminator sequence; data messages carry one extra trailer byte, the
//! block check character over everything between the STX and the trailer.
//!
//! Frame reading tolerates line noise ahead of a frame: bytes are drained
//! until the initiator is consumed, with a fixed 30 second drain window
//! after which reading proceeds regardless. Drained bytes are discarded.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use super::bcc::calculate_bcc;
use super::control;
use super::data_block::DataBlock;
use super::{latin1_to_string, string_to_latin1};
use crate::error::{DriverError, ParseError};
use crate::serial::transport::MeterTransport;

const INITIATOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

static REQUEST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s-u)^/\?(?P<device_address>[^!]*)!\r\n$").expect("request pattern must compile")
});

static IDENTIFICATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?-u)^/(?P<manufacturer_id>\w{3})(?P<baud_rate_id>[0-9A-Z])(?P<mode_ids>(?:\\[^\\/!])*)(?P<identification>[^\\/!\r\n]+)\r\n$",
    )
    .expect("identification pattern must compile")
});

static ACKNOWLEDGEMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?-u)^\x06(?P<protocol_control>[0-9])(?P<baud_rate_id>[0-9A-Z])(?P<mode_control>[0-9A-Z])\r\n$",
    )
    .expect("acknowledgement pattern must compile")
});

static DATA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s-u)^\x02(?P<data>[^!]*)!\r\n\x03(?P<block_check>.)$")
        .expect("data pattern must compile")
});

/// The four Mode C message kinds and their framing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Identification,
    Acknowledgement,
    Data,
}

impl MessageKind {
    pub fn initiator(&self) -> &'static [u8] {
        match self {
            MessageKind::Request | MessageKind::Identification => b"/",
            MessageKind::Acknowledgement => b"\x06",
            MessageKind::Data => b"\x02",
        }
    }

    pub fn terminator(&self) -> &'static [u8] {
        match self {
            MessageKind::Data => b"!\r\n\x03",
            _ => b"\r\n",
        }
    }

    pub fn extra_bytes_after_terminator(&self) -> usize {
        match self {
            MessageKind::Data => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Identification => write!(f, "identification"),
            MessageKind::Acknowledgement => write!(f, "acknowledgement"),
            MessageKind::Data => write!(f, "data"),
        }
    }
}

/// Readout request sent to the meter: `/?<device_address>!\r\n`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub timestamp: DateTime<Utc>,
    pub device_address: String,
}

impl RequestMessage {
    pub fn new(device_address: impl Into<String>) -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            device_address: device_address.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = b"/?".to_vec();
        bytes.extend_from_slice(&string_to_latin1(&self.device_address));
        bytes.extend_from_slice(b"!\r\n");
        bytes
    }

    pub fn from_bytes(timestamp: DateTime<Utc>, frame: &[u8]) -> Result<Self, ParseError> {
        let captures = match_frame(&REQUEST_PATTERN, MessageKind::Request, frame)?;
        Ok(Self {
            timestamp,
            device_address: latin1_to_string(&captures["device_address"]),
        })
    }
}

/// Identification announced by the meter:
/// `/<manufacturer><baud rate id><mode escapes><identification>\r\n`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationMessage {
    pub timestamp: DateTime<Utc>,
    pub manufacturer_id: String,
    pub baud_rate_id: char,
    pub mode_ids: String,
    pub identification: String,
}

impl IdentificationMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = b"/".to_vec();
        bytes.extend_from_slice(&string_to_latin1(&self.manufacturer_id));
        bytes.push(self.baud_rate_id as u8);
        bytes.extend_from_slice(&string_to_latin1(&self.mode_ids));
        bytes.extend_from_slice(&string_to_latin1(&self.identification));
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    pub fn from_bytes(timestamp: DateTime<Utc>, frame: &[u8]) -> Result<Self, ParseError> {
        let captures = match_frame(&IDENTIFICATION_PATTERN, MessageKind::Identification, frame)?;
        Ok(Self {
            timestamp,
            manufacturer_id: latin1_to_string(&captures["manufacturer_id"]),
            baud_rate_id: captures["baud_rate_id"][0] as char,
            mode_ids: latin1_to_string(&captures["mode_ids"]),
            identification: latin1_to_string(&captures["identification"]),
        })
    }
}

/// Acknowledgement selecting protocol, baud rate and mode:
/// `\x06<protocol control><baud rate id><mode control>\r\n`.
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgementMessage {
    pub timestamp: DateTime<Utc>,
    pub protocol_control: char,
    pub baud_rate_id: char,
    pub mode_control: char,
}

impl AcknowledgementMessage {
    pub fn new(protocol_control: char, baud_rate_id: char, mode_control: char) -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            protocol_control,
            baud_rate_id,
            mode_control,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![
            control::ACK,
            self.protocol_control as u8,
            self.baud_rate_id as u8,
            self.mode_control as u8,
            control::CR,
            control::LF,
        ]
    }

    pub fn from_bytes(timestamp: DateTime<Utc>, frame: &[u8]) -> Result<Self, ParseError> {
        let captures = match_frame(&ACKNOWLEDGEMENT_PATTERN, MessageKind::Acknowledgement, frame)?;
        Ok(Self {
            timestamp,
            protocol_control: captures["protocol_control"][0] as char,
            baud_rate_id: captures["baud_rate_id"][0] as char,
            mode_control: captures["mode_control"][0] as char,
        })
    }
}

/// Complete readout: `\x02<data block>!\r\n\x03<bcc>`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub timestamp: DateTime<Utc>,
    pub data: DataBlock,
}

impl DataMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut checked = self.data.to_bytes();
        checked.extend_from_slice(b"!\r\n\x03");
        let block_check = calculate_bcc(&checked);
        let mut bytes = vec![control::STX];
        bytes.append(&mut checked);
        bytes.push(block_check);
        bytes
    }

    pub fn from_bytes(timestamp: DateTime<Utc>, frame: &[u8]) -> Result<Self, ParseError> {
        let captures = match_frame(&DATA_PATTERN, MessageKind::Data, frame)?;

        let data = captures.name("data").map(|m| m.as_bytes()).unwrap_or(b"");
        let mut checked = data.to_vec();
        checked.extend_from_slice(b"!\r\n\x03");
        let computed = calculate_bcc(&checked);
        let received = captures["block_check"][0];
        if computed != received {
            return Err(ParseError::BlockCheck { computed, received });
        }

        Ok(Self {
            timestamp,
            data: DataBlock::from_bytes(timestamp, data)?,
        })
    }
}

/// Any Mode C message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Identification(IdentificationMessage),
    Acknowledgement(AcknowledgementMessage),
    Data(DataMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request(_) => MessageKind::Request,
            Message::Identification(_) => MessageKind::Identification,
            Message::Acknowledgement(_) => MessageKind::Acknowledgement,
            Message::Data(_) => MessageKind::Data,
        }
    }

    /// Byte-exact wire encoding; the round-trip inverse of [`Message::from_bytes`].
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Message::Request(message) => message.to_bytes(),
            Message::Identification(message) => message.to_bytes(),
            Message::Acknowledgement(message) => message.to_bytes(),
            Message::Data(message) => message.to_bytes(),
        }
    }

    pub fn from_bytes(
        kind: MessageKind,
        timestamp: DateTime<Utc>,
        frame: &[u8],
    ) -> Result<Self, ParseError> {
        match kind {
            MessageKind::Request => {
                RequestMessage::from_bytes(timestamp, frame).map(Message::Request)
            }
            MessageKind::Identification => {
                IdentificationMessage::from_bytes(timestamp, frame).map(Message::Identification)
            }
            MessageKind::Acknowledgement => {
                AcknowledgementMessage::from_bytes(timestamp, frame).map(Message::Acknowledgement)
            }
            MessageKind::Data => DataMessage::from_bytes(timestamp, frame).map(Message::Data),
        }
    }
}

fn match_frame<'a>(
    pattern: &Regex,
    kind: MessageKind,
    frame: &'a [u8],
) -> Result<regex::bytes::Captures<'a>, ParseError> {
    pattern.captures(frame).ok_or_else(|| ParseError::Frame {
        kind,
        frame: frame.to_vec(),
    })
}

/// Read one complete frame of the given kind from the transport and parse
/// it, stamping the arrival time.
pub async fn read_frame<T: MeterTransport + ?Sized>(
    transport: &mut T,
    kind: MessageKind,
) -> Result<Message, DriverError> {
    let mut frame = Vec::new();

    match tokio::time::timeout(INITIATOR_DRAIN_TIMEOUT, transport.read_until(kind.initiator()))
        .await
    {
        Ok(drained) => {
            let drained = drained?;
            if drained.len() > kind.initiator().len() {
                log::debug!(
                    "discarded {} noise bytes ahead of the {} initiator",
                    drained.len() - kind.initiator().len(),
                    kind
                );
            }
            frame.extend_from_slice(kind.initiator());
        }
        Err(_) => log::warn!("no {kind} initiator within the drain window, reading on"),
    }

    frame.extend(transport.read_until(kind.terminator()).await?);
    frame.extend(
        transport
            .read_exact(kind.extra_bytes_after_terminator())
            .await?,
    );

    let timestamp = Utc::now();
    Ok(Message::from_bytes(kind, timestamp, &frame)?)
}
