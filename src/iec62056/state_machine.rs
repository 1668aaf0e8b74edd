//! Pure Mode C dialogue state machine.
//!
//! [`next_state`] is a value transformation with no I/O: the serial driver
//! owns the current state and interprets the returned effects against the
//! transport. The two terminal states always emit a reset, so the dialogue
//! restarts after the polling delay no matter how a cycle ends.

use super::data_block::DataBlock;
use super::message::{AcknowledgementMessage, Message, MessageKind, RequestMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum ModeCState {
    Initial,
    Identified {
        manufacturer_id: String,
        baud_rate_id: char,
        identification: String,
    },
    DataReadoutSuccess {
        data: DataBlock,
    },
    ProtocolError {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModeCEvent {
    Reset,
    ReceiveMessage(Message),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModeCEffect {
    SendMessage(Message),
    AwaitMessage(MessageKind),
    Reset,
    ResetSpeed,
    ChangeSpeed(char),
}

/// Advance the dialogue by one event, yielding the next state and the
/// effects to interpret, in order.
pub fn next_state(state: ModeCState, event: ModeCEvent) -> (ModeCState, Vec<ModeCEffect>) {
    let message = match event {
        ModeCEvent::Reset => {
            return (
                ModeCState::Initial,
                vec![
                    ModeCEffect::SendMessage(Message::Request(RequestMessage::new(""))),
                    ModeCEffect::ResetSpeed,
                    ModeCEffect::AwaitMessage(MessageKind::Identification),
                ],
            )
        }
        ModeCEvent::ReceiveMessage(message) => message,
    };

    match (state, message) {
        (ModeCState::Initial, Message::Identification(identification)) => {
            let baud_rate_id = identification.baud_rate_id;
            (
                ModeCState::Identified {
                    manufacturer_id: identification.manufacturer_id,
                    baud_rate_id,
                    identification: identification.identification,
                },
                vec![
                    ModeCEffect::SendMessage(Message::Acknowledgement(
                        AcknowledgementMessage::new('0', baud_rate_id, '0'),
                    )),
                    // The speed change must happen after the acknowledgement
                    // is on the wire and before the data frame is read.
                    ModeCEffect::ChangeSpeed(baud_rate_id),
                    ModeCEffect::AwaitMessage(MessageKind::Data),
                ],
            )
        }
        (ModeCState::Initial, other) => (
            ModeCState::ProtocolError {
                message: format!(
                    "expected an identification message, received a {} message",
                    other.kind()
                ),
            },
            vec![ModeCEffect::Reset],
        ),
        (
            ModeCState::Identified { identification, .. },
            Message::Data(data_message),
        ) => (
            ModeCState::DataReadoutSuccess {
                data: data_message
                    .data
                    .with_manufacturer_identification(identification),
            },
            vec![ModeCEffect::Reset],
        ),
        (ModeCState::Identified { .. }, other) => (
            ModeCState::ProtocolError {
                message: format!(
                    "expected a data message, received a {} message",
                    other.kind()
                ),
            },
            vec![ModeCEffect::Reset],
        ),
        (state, message) => (
            ModeCState::ProtocolError {
                message: format!(
                    "received a {} message in state {state:?}",
                    message.kind()
                ),
            },
            vec![ModeCEffect::Reset],
        ),
    }
}
