//! Block check character (BCC) computation.

/// XOR of all bytes in the checked range. An empty range yields 0x00.
pub fn calculate_bcc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Verify the BCC of received data against the trailer byte.
pub fn verify_bcc(data: &[u8], expected_bcc: u8) -> bool {
    calculate_bcc(data) == expected_bcc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bcc_calculation() {
        let data = b"test";
        assert_eq!(calculate_bcc(data), b't' ^ b'e' ^ b's' ^ b't');
    }

    #[test]
    fn test_bcc_of_empty_input() {
        assert_eq!(calculate_bcc(b""), 0x00);
    }

    #[test]
    fn test_verify_bcc() {
        assert!(verify_bcc(b"test", b't' ^ b'e' ^ b's' ^ b't'));
        assert!(!verify_bcc(b"test", 0x00));
    }

    proptest! {
        // XOR distributes over concatenation.
        #[test]
        fn test_bcc_concatenation(left: Vec<u8>, right: Vec<u8>) {
            let mut joined = left.clone();
            joined.extend_from_slice(&right);
            prop_assert_eq!(
                calculate_bcc(&joined),
                calculate_bcc(&left) ^ calculate_bcc(&right)
            );
        }
    }
}
