//! MQTT sink: republishes readouts using the home-automation discovery
//! convention.
//!
//! Every configured data set becomes one sensor entity. The retained
//! discovery payload is published once per entity on first sighting, the
//! retained state payload on every readout. Data sets without a
//! configuration entry are logged and skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use rumqttc::{AsyncClient, QoS};
use serde_json::json;

use crate::config::MqttConfig;
use crate::iec62056::obis::{ObisDataBlock, ObisDataSet, ObisDataSetConfig, ObisId};
use crate::topic::Subscription;

static ENTITY_SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\W").expect("slug pattern must compile"));

/// Consume readouts from the topic until it closes.
pub async fn run_sink(
    mut subscription: Subscription<ObisDataBlock>,
    client: AsyncClient,
    config: MqttConfig,
    data_set_configs: Arc<HashMap<ObisId, ObisDataSetConfig>>,
) -> Result<(), rumqttc::ClientError> {
    let mut configured_ids: HashSet<ObisId> = HashSet::new();

    while let Some(readout) = subscription.next().await {
        for data_set in &readout.data_sets {
            let Some(data_set_config) = data_set_configs
                .get(&data_set.id())
                // An `Unknown` data set never has a configuration entry, so
                // this filter only guards against typing done with a
                // different configuration map.
                .filter(|_| !matches!(data_set, ObisDataSet::Unknown { .. }))
            else {
                log::debug!("no usable configuration for data set {}", data_set.id());
                continue;
            };

            if configured_ids.insert(data_set.id()) {
                client
                    .publish(
                        configuration_topic(&config, data_set_config),
                        QoS::AtLeastOnce,
                        true,
                        configuration_payload(&config, data_set_config, &readout, data_set)
                            .to_string(),
                    )
                    .await?;
            }

            client
                .publish(
                    state_topic(&config, data_set_config),
                    QoS::AtLeastOnce,
                    true,
                    state_payload(data_set).to_string(),
                )
                .await?;
        }
    }

    log::debug!("readout topic closed, stopping the MQTT sink");
    Ok(())
}

fn sensor_name(config: &MqttConfig, data_set_config: &ObisDataSetConfig) -> String {
    format!("{} {}", config.device.name, data_set_config.name)
}

fn entity_id(config: &MqttConfig, data_set_config: &ObisDataSetConfig) -> String {
    ENTITY_SLUG_PATTERN
        .replace_all(&sensor_name(config, data_set_config), "-")
        .into_owned()
}

fn configuration_topic(config: &MqttConfig, data_set_config: &ObisDataSetConfig) -> String {
    config
        .configuration_topic_template
        .replace("{entity_id}", &entity_id(config, data_set_config))
}

fn state_topic(config: &MqttConfig, data_set_config: &ObisDataSetConfig) -> String {
    config
        .state_topic_template
        .replace("{entity_id}", &entity_id(config, data_set_config))
}

fn configuration_payload(
    config: &MqttConfig,
    data_set_config: &ObisDataSetConfig,
    readout: &ObisDataBlock,
    data_set: &ObisDataSet,
) -> serde_json::Value {
    let name = sensor_name(config, data_set_config);
    let model = if readout.manufacturer_identification.is_empty() {
        config.device.model.clone()
    } else {
        readout.manufacturer_identification.clone()
    };

    let mut payload = json!({
        "name": name,
        "state_topic": state_topic(config, data_set_config),
        "value_template": "{{ value_json.value }}",
        "device": {
            "identifiers": [readout.device_id().unwrap_or(&config.device.id)],
            "manufacturer": config.device.manufacturer,
            "model": model,
            "name": config.device.name,
        },
        "unique_id": name,
    });

    if let Some(unit) = data_set.unit() {
        payload["unit_of_measurement"] = json!(unit);
        if let Some(device_class) = device_class(unit) {
            payload["device_class"] = json!(device_class);
        }
        if let Some(state_class) = state_class(unit) {
            payload["state_class"] = json!(state_class);
        }
    }

    payload
}

fn state_payload(data_set: &ObisDataSet) -> serde_json::Value {
    let value = match data_set {
        ObisDataSet::Integer { value, .. } => json!(value),
        ObisDataSet::Float { value, .. } => json!(value),
        ObisDataSet::String { value, .. } => json!(value),
        ObisDataSet::Unknown { .. } => serde_json::Value::Null,
    };
    json!({
        "timestamp": data_set.timestamp().to_rfc3339(),
        "value": value,
    })
}

fn device_class(unit: &str) -> Option<&'static str> {
    match unit {
        "°C" => Some("temperature"),
        "W" | "kW" => Some("power"),
        "Wh" | "kWh" => Some("energy"),
        "A" => Some("current"),
        "V" => Some("voltage"),
        _ => None,
    }
}

fn state_class(unit: &str) -> Option<&'static str> {
    match unit {
        "°C" | "W" | "kW" | "A" | "V" => Some("measurement"),
        "Wh" | "kWh" => Some("total_increasing"),
        _ => None,
    }
}
