//! Readout payload parsing: data sets and data blocks.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use super::{latin1_to_string, string_to_latin1};
use crate::error::ParseError;

// One readout line: address, then one or more parenthesised value groups.
// Only the first group is retained; meters append historical values in
// trailing groups.
static DATA_SET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x-u)^
            (?P<address>[^(]+)
            \(
                (?P<value>[^()*/!]{1,32})?
                (?:\*(?P<unit>[^()/!]{1,16}))?
            \)
            (?:
                \(
                    (?:[^()*/!]{1,32})?
                    (?:\*[^()/!]{1,16})?
                \)
            )*
        $",
    )
    .expect("data set pattern must compile")
});

/// One line of a readout: `address(value*unit)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    pub timestamp: DateTime<Utc>,
    pub address: String,
    pub value: Option<String>,
    pub unit: Option<String>,
}

impl DataSet {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = string_to_latin1(&self.address);
        bytes.push(b'(');
        if let Some(value) = &self.value {
            bytes.extend_from_slice(&string_to_latin1(value));
        }
        if let Some(unit) = &self.unit {
            bytes.push(b'*');
            bytes.extend_from_slice(&string_to_latin1(unit));
        }
        bytes.push(b')');
        bytes
    }

    pub fn from_bytes(timestamp: DateTime<Utc>, line: &[u8]) -> Result<Self, ParseError> {
        let captures = DATA_SET_PATTERN
            .captures(line)
            .ok_or_else(|| ParseError::DataSetLine { line: line.to_vec() })?;

        Ok(Self {
            timestamp,
            address: latin1_to_string(&captures["address"]),
            value: captures.name("value").map(|m| latin1_to_string(m.as_bytes())),
            unit: captures.name("unit").map(|m| latin1_to_string(m.as_bytes())),
        })
    }
}

/// The ordered data sets of one readout, plus the identification string the
/// meter announced during the handshake (attached once the dialogue knows it).
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    pub manufacturer_identification: String,
    pub data_lines: Vec<DataSet>,
}

impl DataBlock {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for line in &self.data_lines {
            bytes.extend_from_slice(&line.to_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        bytes
    }

    /// Parse a CRLF-separated sequence of data set lines; empty lines are
    /// skipped.
    pub fn from_bytes(timestamp: DateTime<Utc>, data: &[u8]) -> Result<Self, ParseError> {
        let data_lines = split_crlf(data)
            .filter(|line| !line.is_empty())
            .map(|line| DataSet::from_bytes(timestamp, line))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            manufacturer_identification: String::new(),
            data_lines,
        })
    }

    pub fn with_manufacturer_identification(
        mut self,
        manufacturer_identification: impl Into<String>,
    ) -> Self {
        self.manufacturer_identification = manufacturer_identification.into();
        self
    }
}

fn split_crlf(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = data;
    let mut done = rest.is_empty();
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        match rest.windows(2).position(|window| window == b"\r\n") {
            Some(position) => {
                let line = &rest[..position];
                rest = &rest[position + 2..];
                done = rest.is_empty();
                Some(line)
            }
            None => {
                done = true;
                Some(rest)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn test_parse_empty_data_block() {
        assert_eq!(
            DataBlock::from_bytes(epoch(), b"").unwrap(),
            DataBlock {
                manufacturer_identification: String::new(),
                data_lines: Vec::new(),
            }
        );
    }

    #[test]
    fn test_parse_data_set_with_unit() {
        let data_set = DataSet::from_bytes(epoch(), b"1-0:1.8.0*255(015882.6927*kWh)").unwrap();
        assert_eq!(data_set.address, "1-0:1.8.0*255");
        assert_eq!(data_set.value.as_deref(), Some("015882.6927"));
        assert_eq!(data_set.unit.as_deref(), Some("kWh"));
    }

    #[test]
    fn test_parse_data_set_without_unit() {
        let data_set = DataSet::from_bytes(epoch(), b"1-1:0.9.1(185532)").unwrap();
        assert_eq!(data_set.value.as_deref(), Some("185532"));
        assert_eq!(data_set.unit, None);
    }

    #[test]
    fn test_parse_data_set_with_empty_value() {
        let data_set = DataSet::from_bytes(epoch(), b"1-1:0.0.0()").unwrap();
        assert_eq!(data_set.value, None);
        assert_eq!(data_set.unit, None);
    }

    #[test]
    fn test_multi_value_data_set_keeps_first_group() {
        let data_set = DataSet::from_bytes(epoch(), b"1-1:1.6.0(10.102*kW)(2104070015)").unwrap();
        assert_eq!(data_set.address, "1-1:1.6.0");
        assert_eq!(data_set.value.as_deref(), Some("10.102"));
        assert_eq!(data_set.unit.as_deref(), Some("kW"));
    }

    #[test]
    fn test_parse_rejects_reserved_bytes_in_value() {
        assert!(DataSet::from_bytes(epoch(), b"1-0:1.8.0(12/34)").is_err());
        assert!(DataSet::from_bytes(epoch(), b"no parentheses").is_err());
    }

    #[test]
    fn test_data_block_round_trip() {
        let data = b"1-1:F.F(00000000)\r\n1-0:16.7.0*255(000028*W)\r\n";
        let block = DataBlock::from_bytes(epoch(), data).unwrap();
        assert_eq!(block.data_lines.len(), 2);
        assert_eq!(block.to_bytes(), data);
    }

    proptest! {
        #[test]
        fn test_data_set_round_trip(
            address in "[0-9A-Za-z:.*-]{1,16}",
            value in proptest::option::of("[0-9A-Za-z .,-]{1,32}"),
            unit in proptest::option::of("[0-9A-Za-z%]{1,16}"),
        ) {
            let data_set = DataSet {
                timestamp: epoch(),
                address,
                value,
                unit,
            };
            let reparsed = DataSet::from_bytes(epoch(), &data_set.to_bytes()).unwrap();
            prop_assert_eq!(reparsed, data_set);
        }
    }
}
