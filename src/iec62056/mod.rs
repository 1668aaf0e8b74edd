//! IEC 62056-21 Mode C protocol core.
//!
//! Wire strings are ISO-8859-1 encoded: every byte maps to the Unicode code
//! point of the same value, so the conversions below are total.

pub mod bcc;
pub mod data_block;
pub mod message;
pub mod obis;
pub mod state_machine;

/// Control characters used by the protocol.
pub mod control {
    pub const STX: u8 = 0x02; // Start of text
    pub const ETX: u8 = 0x03; // End of text
    pub const ACK: u8 = 0x06; // Acknowledge
    pub const CR: u8 = 0x0D; // Carriage return
    pub const LF: u8 = 0x0A; // Line feed
}

/// Baud rate for a Mode C baud rate id character.
pub fn baud_rate_from_char(c: char) -> Option<u32> {
    match c {
        '0' => Some(300),
        '1' => Some(600),
        '2' => Some(1200),
        '3' => Some(2400),
        '4' => Some(4800),
        '5' => Some(9600),
        '6' => Some(19200),
        _ => None,
    }
}

/// Mode C baud rate id character for a baud rate.
pub fn char_from_baud_rate(baud: u32) -> Option<char> {
    match baud {
        300 => Some('0'),
        600 => Some('1'),
        1200 => Some('2'),
        2400 => Some('3'),
        4800 => Some('4'),
        9600 => Some('5'),
        19200 => Some('6'),
        _ => None,
    }
}

pub(crate) fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub(crate) fn string_to_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_mapping() {
        assert_eq!(baud_rate_from_char('0'), Some(300));
        assert_eq!(baud_rate_from_char('5'), Some(9600));
        assert_eq!(baud_rate_from_char('6'), Some(19200));
        assert_eq!(baud_rate_from_char('7'), None);
        assert_eq!(char_from_baud_rate(9600), Some('5'));
        assert_eq!(char_from_baud_rate(115200), None);
    }

    #[test]
    fn test_latin1_round_trip() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        assert_eq!(string_to_latin1(&latin1_to_string(&bytes)), bytes);
    }
}
