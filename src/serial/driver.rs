//! Serial dialogue driver.
//!
//! Runs the Mode C state machine against the transport: every turn feeds
//! the pending event to the machine, reacts to the resulting state and then
//! interprets the emitted effects in order. Sends and receives are bounded
//! by the configured write and read deadlines. Completed readouts are typed
//! and published on the topic.
//!
//! The meter link is noisy; parsing, protocol and timeout faults never end
//! the driver. They are logged, the dialogue restarts from the initial
//! state after the polling delay, and only unrecoverable transport faults
//! propagate to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::error::DriverError;
use crate::iec62056::baud_rate_from_char;
use crate::iec62056::message::read_frame;
use crate::iec62056::obis::{ObisDataBlock, ObisDataSetConfig, ObisId};
use crate::iec62056::state_machine::{next_state, ModeCEffect, ModeCEvent, ModeCState};
use crate::serial::transport::MeterTransport;
use crate::topic::Topic;

/// Timing and speed parameters of the dialogue.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Baud rate used for the initial handshake; restored on every reset.
    pub default_baud_rate: u32,
    /// Pause between readout cycles.
    pub polling_delay: Duration,
    /// Pause after each turn, giving the meter time to respond.
    pub response_delay: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

pub struct MeterDriver<T> {
    transport: T,
    topic: Topic<ObisDataBlock>,
    data_set_configs: Arc<HashMap<ObisId, ObisDataSetConfig>>,
    settings: DriverSettings,
}

impl<T: MeterTransport> MeterDriver<T> {
    pub fn new(
        transport: T,
        topic: Topic<ObisDataBlock>,
        data_set_configs: Arc<HashMap<ObisId, ObisDataSetConfig>>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            transport,
            topic,
            data_set_configs,
            settings,
        }
    }

    /// Run the dialogue until shutdown is signalled or a fatal transport
    /// fault occurs. The transport is closed on every exit path.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DriverError> {
        let mut state = ModeCState::Initial;
        let mut event = ModeCEvent::Reset;

        let outcome = loop {
            let (new_state, effects) = next_state(state, event);
            state = new_state;
            event = ModeCEvent::Reset;

            let turn = tokio::select! {
                turn = self.turn(&state, effects, &mut event) => turn,
                _ = shutdown.changed() => {
                    log::info!("shutting down the meter dialogue");
                    break Ok(());
                }
            };

            match turn {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {
                    log::warn!("recoverable fault in state {state:?}: {err}");
                    event = ModeCEvent::Reset;
                    tokio::select! {
                        _ = sleep(self.settings.polling_delay) => {}
                        _ = shutdown.changed() => {
                            log::info!("shutting down the meter dialogue");
                            break Ok(());
                        }
                    }
                }
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = self.transport.close().await {
            log::warn!("failed to close the serial transport: {err}");
        }
        outcome
    }

    /// React to the new state, interpret its effects in order, then give
    /// the meter time to respond.
    async fn turn(
        &mut self,
        state: &ModeCState,
        effects: Vec<ModeCEffect>,
        event: &mut ModeCEvent,
    ) -> Result<(), DriverError> {
        log::debug!("dialogue in state {state:?}");
        match state {
            ModeCState::DataReadoutSuccess { data } => {
                let readout = ObisDataBlock::from_data_block(&self.data_set_configs, data)?;
                log::info!(
                    "completed readout of {} data sets from device {:?}",
                    readout.data_sets.len(),
                    readout.device_id().unwrap_or("<unidentified>"),
                );
                self.topic.publish(readout);
            }
            ModeCState::ProtocolError { message } => {
                return Err(DriverError::Protocol(message.clone()));
            }
            _ => {}
        }

        for effect in effects {
            match effect {
                ModeCEffect::SendMessage(message) => {
                    let bytes = message.to_bytes();
                    log::debug!("sending {} message ({} bytes)", message.kind(), bytes.len());
                    timeout(self.settings.write_timeout, async {
                        self.transport.write_all(&bytes).await?;
                        self.transport.flush().await
                    })
                    .await??;
                }
                ModeCEffect::AwaitMessage(kind) => {
                    let message = timeout(
                        self.settings.read_timeout,
                        read_frame(&mut self.transport, kind),
                    )
                    .await??;
                    log::debug!("received {} message", message.kind());
                    *event = ModeCEvent::ReceiveMessage(message);
                }
                ModeCEffect::Reset => {
                    *event = ModeCEvent::Reset;
                    sleep(self.settings.polling_delay).await;
                }
                ModeCEffect::ResetSpeed => {
                    self.transport
                        .set_baud_rate(self.settings.default_baud_rate)?;
                }
                ModeCEffect::ChangeSpeed(baud_rate_id) => match baud_rate_from_char(baud_rate_id) {
                    Some(baud_rate) => {
                        log::debug!("switching the line to {baud_rate} baud");
                        self.transport.set_baud_rate(baud_rate)?;
                    }
                    None => log::warn!(
                        "meter announced unknown baud rate id {baud_rate_id:?}, \
                         staying at the current speed"
                    ),
                },
            }
        }

        sleep(self.settings.response_delay).await;
        Ok(())
    }
}
