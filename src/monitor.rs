//! Task wiring for the monitor service.
//!
//! One event loop, three cooperating tasks: the serial driver, the MQTT
//! sink and the readout logger. The serial port and the MQTT session are
//! acquired here and released on every exit path; ctrl-c signals shutdown
//! through a watch channel and the sinks end once the driver (the only
//! publisher) is gone.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, MqttOptions};
use tokio::sync::watch;

use crate::config::Config;
use crate::error::MonitorError;
use crate::iec62056::obis::ObisDataBlock;
use crate::mqtt;
use crate::serial::driver::{DriverSettings, MeterDriver};
use crate::serial::transport::SerialLink;
use crate::topic::{Subscription, Topic};

pub async fn run(config: Config) -> Result<(), MonitorError> {
    let data_set_configs = Arc::new(config.obis.by_id());
    let topic: Topic<ObisDataBlock> = Topic::new();

    let transport = SerialLink::open(config.serial_port.builder()?)?;
    log::debug!(
        "opened serial connection {} at {} baud",
        config.serial_port.port_url,
        config.serial_port.baud_rate
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received interrupt, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let settings = DriverSettings {
        default_baud_rate: config.serial_port.baud_rate,
        polling_delay: config.serial_port.polling_delay(),
        response_delay: config.serial_port.response_delay(),
        read_timeout: config.serial_port.read_timeout(),
        write_timeout: config.serial_port.write_timeout(),
    };

    let mqtt_session = if config.mqtt.enabled {
        let mut options = MqttOptions::new(
            config.mqtt.device.id.clone(),
            config.mqtt.broker.hostname.clone(),
            config.mqtt.broker.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (
            config.mqtt.broker.username.clone(),
            config.mqtt.broker.password.clone(),
        ) {
            options.set_credentials(username, password);
        }
        let (client, mut event_loop) = AsyncClient::new(options, 16);
        log::debug!(
            "connecting to MQTT broker {}:{}",
            config.mqtt.broker.hostname,
            config.mqtt.broker.port
        );

        let connection = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => log::trace!("MQTT event: {event:?}"),
                    Err(err) => {
                        log::error!("MQTT connection error: {err}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        let sink = tokio::spawn(mqtt::run_sink(
            topic.subscribe(),
            client.clone(),
            config.mqtt.clone(),
            Arc::clone(&data_set_configs),
        ));
        Some((client, connection, sink))
    } else {
        None
    };

    let logger = tokio::spawn(log_readouts(topic.subscribe()));

    let driver = MeterDriver::new(transport, topic, data_set_configs, settings);
    let outcome = match driver.run(shutdown_rx).await {
        Ok(()) => Ok(()),
        Err(err) => Err(MonitorError::Driver(err)),
    };

    // The driver owned the only topic sender, so the sinks are winding
    // down now; release the MQTT session afterwards.
    let _ = logger.await;
    if let Some((client, connection, sink)) = mqtt_session {
        match sink.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("MQTT sink failed: {err}"),
            Err(err) => log::warn!("MQTT sink task failed: {err}"),
        }
        let _ = client.disconnect().await;
        connection.abort();
    }

    outcome
}

/// Logs every typed data set of every readout.
async fn log_readouts(mut subscription: Subscription<ObisDataBlock>) {
    while let Some(readout) = subscription.next().await {
        log::debug!(
            "readout from {:?} (device {:?})",
            readout.manufacturer_identification,
            readout.device_id()
        );
        for data_set in &readout.data_sets {
            log::debug!("  data set {data_set}");
        }
    }
}
