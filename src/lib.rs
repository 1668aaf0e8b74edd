//! Polls IEC 62056-21 "Mode C" electricity meters over a serial link and
//! republishes the decoded OBIS readings to an MQTT broker in the shape
//! expected by home-automation discovery.
//!
//! The pipeline: the serial driver ([`serial::driver`]) runs the pure Mode C
//! state machine ([`iec62056::state_machine`]) against the transport,
//! decoding frames with the message codec ([`iec62056::message`]). Completed
//! readouts are typed by the OBIS layer ([`iec62056::obis`]) and broadcast
//! over an in-process topic ([`topic`]) to the MQTT sink ([`mqtt`]) and the
//! readout logger.

pub mod config;
pub mod error;
pub mod iec62056;
pub mod monitor;
pub mod mqtt;
pub mod serial;
pub mod topic;
