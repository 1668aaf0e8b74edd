//! OBIS identifiers and typed data sets.
//!
//! Addresses use the reduced OBIS notation `A-B:C.D.E*F`; absent groups
//! default to 0 and the display codes C, F, L, P in the C and D positions
//! stand for 96 to 99. All three group F separators (`*`, `&`, `.`) are
//! accepted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::data_block::{DataBlock, DataSet};
use crate::error::ParseError;

static OBIS_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^
            (?:
                (?P<a>[0-9]+)
                -
                (?P<b>[0-9]+)
                :
            )?
            (?P<c>[0-9]+|[CFLP])
            \.
            (?P<d>[0-9]+|[CFLP])
            (?:
                \.
                (?P<e>[0-9]+)
                (?:
                    [*&.]
                    (?P<f>[0-9]+)
                )?
            )?
        $",
    )
    .expect("OBIS id pattern must compile")
});

/// The six OBIS value groups `(A, B, C, D, E, F)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObisId(pub u8, pub u8, pub u8, pub u8, pub u8, pub u8);

/// OBIS id of the metering point identification (device id).
pub const METERING_POINT_ID: ObisId = ObisId(1, 0, 96, 1, 0, 255);

impl FromStr for ObisId {
    type Err = ParseError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::ObisAddress {
            address: address.to_string(),
        };
        let captures = OBIS_ID_PATTERN.captures(address).ok_or_else(|| invalid())?;
        let group = |name: &str| -> Result<u8, ParseError> {
            match captures.name(name).map(|m| m.as_str()) {
                None => Ok(0),
                Some("C") => Ok(96),
                Some("F") => Ok(97),
                Some("L") => Ok(98),
                Some("P") => Ok(99),
                Some(digits) => digits.parse().map_err(|_| invalid()),
            }
        };

        Ok(ObisId(
            group("a")?,
            group("b")?,
            group("c")?,
            group("d")?,
            group("e")?,
            group("f")?,
        ))
    }
}

impl fmt::Display for ObisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ObisId(a, b, c, d, e, group_f) = self;
        write!(f, "{a}-{b}:{c}.{d}.{e}*{group_f}")
    }
}

/// How to type the value of a configured data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Float,
    String,
}

/// Configuration entry for one OBIS data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObisDataSetConfig {
    pub id: ObisId,
    pub name: String,
    pub value_type: ValueType,
}

/// One data set with its value typed according to configuration.
/// Addresses without a configuration entry come through as `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum ObisDataSet {
    Integer {
        timestamp: DateTime<Utc>,
        id: ObisId,
        value: i64,
        unit: Option<String>,
    },
    Float {
        timestamp: DateTime<Utc>,
        id: ObisId,
        value: f64,
        unit: Option<String>,
    },
    String {
        timestamp: DateTime<Utc>,
        id: ObisId,
        value: String,
    },
    Unknown {
        timestamp: DateTime<Utc>,
        id: ObisId,
        unit: Option<String>,
    },
}

impl ObisDataSet {
    /// Type a parsed data set. An absent `value_type` yields `Unknown`;
    /// an empty value reads as 0, 0.0 or the empty string.
    pub fn from_data_set(
        data_set: &DataSet,
        value_type: Option<ValueType>,
    ) -> Result<Self, ParseError> {
        let id = data_set.address.parse()?;
        Self::with_type(id, data_set, value_type)
    }

    fn with_type(
        id: ObisId,
        data_set: &DataSet,
        value_type: Option<ValueType>,
    ) -> Result<Self, ParseError> {
        let timestamp = data_set.timestamp;
        let unit = data_set.unit.clone();
        let value = data_set.value.as_deref().unwrap_or("");

        match value_type {
            Some(ValueType::Integer) => Ok(ObisDataSet::Integer {
                timestamp,
                id,
                value: parse_number(value, "0", "integer")?,
                unit,
            }),
            Some(ValueType::Float) => Ok(ObisDataSet::Float {
                timestamp,
                id,
                value: parse_number(value, "0.0", "float")?,
                unit,
            }),
            Some(ValueType::String) => Ok(ObisDataSet::String {
                timestamp,
                id,
                value: value.to_string(),
            }),
            None => Ok(ObisDataSet::Unknown {
                timestamp,
                id,
                unit,
            }),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ObisDataSet::Integer { timestamp, .. }
            | ObisDataSet::Float { timestamp, .. }
            | ObisDataSet::String { timestamp, .. }
            | ObisDataSet::Unknown { timestamp, .. } => *timestamp,
        }
    }

    pub fn id(&self) -> ObisId {
        match self {
            ObisDataSet::Integer { id, .. }
            | ObisDataSet::Float { id, .. }
            | ObisDataSet::String { id, .. }
            | ObisDataSet::Unknown { id, .. } => *id,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            ObisDataSet::Integer { unit, .. } | ObisDataSet::Float { unit, .. } => unit.as_deref(),
            ObisDataSet::String { .. } | ObisDataSet::Unknown { .. } => None,
        }
    }
}

impl fmt::Display for ObisDataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObisDataSet::Integer { id, value, unit, .. } => {
                write!(f, "{id} = {value} {}", unit.as_deref().unwrap_or(""))
            }
            ObisDataSet::Float { id, value, unit, .. } => {
                write!(f, "{id} = {value} {}", unit.as_deref().unwrap_or(""))
            }
            ObisDataSet::String { id, value, .. } => write!(f, "{id} = {value:?}"),
            ObisDataSet::Unknown { id, .. } => write!(f, "{id} = <unknown>"),
        }
    }
}

fn parse_number<N: FromStr>(
    value: &str,
    empty_default: &str,
    expected: &'static str,
) -> Result<N, ParseError> {
    let digits = if value.is_empty() { empty_default } else { value };
    digits.trim().parse().map_err(|_| ParseError::Value {
        value: value.to_string(),
        expected,
    })
}

/// A readout with every data set typed.
#[derive(Debug, Clone, PartialEq)]
pub struct ObisDataBlock {
    pub data_sets: Vec<ObisDataSet>,
    pub manufacturer_identification: String,
}

impl ObisDataBlock {
    /// Type every data set of a readout according to the configuration map.
    pub fn from_data_block(
        data_set_configs: &HashMap<ObisId, ObisDataSetConfig>,
        data_block: &DataBlock,
    ) -> Result<Self, ParseError> {
        let data_sets = data_block
            .data_lines
            .iter()
            .map(|data_set| {
                let id: ObisId = data_set.address.parse()?;
                let value_type = data_set_configs.get(&id).map(|config| config.value_type);
                ObisDataSet::with_type(id, data_set, value_type)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            data_sets,
            manufacturer_identification: data_block.manufacturer_identification.clone(),
        })
    }

    /// The metering point identification, if the readout carries one typed
    /// as a string.
    pub fn device_id(&self) -> Option<&str> {
        self.data_sets.iter().find_map(|data_set| match data_set {
            ObisDataSet::String { id, value, .. } if *id == METERING_POINT_ID => {
                Some(value.as_str())
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn data_set(address: &str, value: Option<&str>, unit: Option<&str>) -> DataSet {
        DataSet {
            timestamp: epoch(),
            address: address.to_string(),
            value: value.map(String::from),
            unit: unit.map(String::from),
        }
    }

    #[test]
    fn test_parse_full_obis_id() {
        assert_eq!(
            "1-0:96.1.0*255".parse::<ObisId>().unwrap(),
            ObisId(1, 0, 96, 1, 0, 255)
        );
    }

    #[test]
    fn test_parse_only_mandatory_groups() {
        assert_eq!("1.2".parse::<ObisId>().unwrap(), ObisId(0, 0, 1, 2, 0, 0));
    }

    #[test]
    fn test_parse_shortened_end() {
        assert_eq!("1-1:1.2".parse::<ObisId>().unwrap(), ObisId(1, 1, 1, 2, 0, 0));
    }

    #[test]
    fn test_parse_display_codes() {
        assert_eq!("1-1:F.F".parse::<ObisId>().unwrap(), ObisId(1, 1, 97, 97, 0, 0));
        assert_eq!("1-1:C.7.0".parse::<ObisId>().unwrap(), ObisId(1, 1, 96, 7, 0, 0));
        assert_eq!("1-1:L.0".parse::<ObisId>().unwrap(), ObisId(1, 1, 98, 0, 0, 0));
        assert_eq!("1-1:P.0".parse::<ObisId>().unwrap(), ObisId(1, 1, 99, 0, 0, 0));
    }

    #[test]
    fn test_group_f_separators_parse_identically() {
        let expected = ObisId(1, 2, 3, 4, 5, 6);
        assert_eq!("1-2:3.4.5*6".parse::<ObisId>().unwrap(), expected);
        assert_eq!("1-2:3.4.5&6".parse::<ObisId>().unwrap(), expected);
        assert_eq!("1-2:3.4.5.6".parse::<ObisId>().unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_incomplete_id() {
        assert!("1-2:3".parse::<ObisId>().is_err());
        assert!("".parse::<ObisId>().is_err());
        assert!("1 - 2:3.4".parse::<ObisId>().is_err());
    }

    #[test]
    fn test_integer_data_set() {
        let typed = ObisDataSet::from_data_set(
            &data_set("1-0:16.7.0*255", Some("000028"), Some("W")),
            Some(ValueType::Integer),
        )
        .unwrap();
        assert_eq!(
            typed,
            ObisDataSet::Integer {
                timestamp: epoch(),
                id: ObisId(1, 0, 16, 7, 0, 255),
                value: 28,
                unit: Some("W".into()),
            }
        );
    }

    #[test]
    fn test_float_data_set() {
        let typed = ObisDataSet::from_data_set(
            &data_set("1-0:1.8.0*255", Some("015882.6927"), Some("kWh")),
            Some(ValueType::Float),
        )
        .unwrap();
        assert_eq!(
            typed,
            ObisDataSet::Float {
                timestamp: epoch(),
                id: ObisId(1, 0, 1, 8, 0, 255),
                value: 15882.6927,
                unit: Some("kWh".into()),
            }
        );
    }

    #[test]
    fn test_float_data_set_with_padded_value() {
        let typed = ObisDataSet::from_data_set(
            &data_set("1-1:56.7.0", Some(" 001.67"), Some("kW")),
            Some(ValueType::Float),
        )
        .unwrap();
        assert!(matches!(typed, ObisDataSet::Float { value, .. } if value == 1.67));
    }

    #[test]
    fn test_string_data_set_drops_unit() {
        let typed = ObisDataSet::from_data_set(
            &data_set("1-0:0.2.0*255", Some("ver.03,432F,20170504"), Some("kWh")),
            Some(ValueType::String),
        )
        .unwrap();
        assert_eq!(
            typed,
            ObisDataSet::String {
                timestamp: epoch(),
                id: ObisId(1, 0, 0, 2, 0, 255),
                value: "ver.03,432F,20170504".into(),
            }
        );
    }

    #[test]
    fn test_empty_values_read_as_zero() {
        let typed =
            ObisDataSet::from_data_set(&data_set("1.2", None, None), Some(ValueType::Integer))
                .unwrap();
        assert!(matches!(typed, ObisDataSet::Integer { value: 0, .. }));
        let typed =
            ObisDataSet::from_data_set(&data_set("1.2", None, None), Some(ValueType::Float))
                .unwrap();
        assert!(matches!(typed, ObisDataSet::Float { value, .. } if value == 0.0));
    }

    #[test]
    fn test_unconfigured_data_set_is_unknown() {
        let typed =
            ObisDataSet::from_data_set(&data_set("1-1:C.5", Some("0000E0F0"), Some("kvar")), None)
                .unwrap();
        assert_eq!(
            typed,
            ObisDataSet::Unknown {
                timestamp: epoch(),
                id: ObisId(1, 1, 96, 5, 0, 0),
                unit: Some("kvar".into()),
            }
        );
    }

    #[test]
    fn test_non_numeric_value_is_rejected() {
        let result = ObisDataSet::from_data_set(
            &data_set("1.2", Some("0F66"), None),
            Some(ValueType::Integer),
        );
        assert!(matches!(result, Err(ParseError::Value { .. })));
    }

    #[test]
    fn test_device_id_lookup() {
        let configs: HashMap<ObisId, ObisDataSetConfig> = [(
            METERING_POINT_ID,
            ObisDataSetConfig {
                id: METERING_POINT_ID,
                name: "Meter ID".into(),
                value_type: ValueType::String,
            },
        )]
        .into_iter()
        .collect();

        let block = DataBlock {
            manufacturer_identification: "LK13BE6067".into(),
            data_lines: vec![
                data_set("1-0:96.1.0*255", Some("001LOG0065282495"), None),
                data_set("1-0:16.7.0*255", Some("000028"), Some("W")),
            ],
        };

        let typed = ObisDataBlock::from_data_block(&configs, &block).unwrap();
        assert_eq!(typed.device_id(), Some("001LOG0065282495"));
        assert_eq!(typed.manufacturer_identification, "LK13BE6067");
        assert_eq!(typed.data_sets.len(), 2);
    }

    #[test]
    fn test_device_id_absent_without_string_typing() {
        let block = DataBlock {
            manufacturer_identification: String::new(),
            data_lines: vec![data_set("1-0:96.1.0*255", Some("001LOG0065282495"), None)],
        };
        let typed = ObisDataBlock::from_data_block(&HashMap::new(), &block).unwrap();
        assert_eq!(typed.device_id(), None);
    }

    proptest! {
        #[test]
        fn test_obis_id_display_round_trip(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) {
            let id = ObisId(a, b, c, d, e, f);
            prop_assert_eq!(id.to_string().parse::<ObisId>().unwrap(), id);
        }
    }
}
