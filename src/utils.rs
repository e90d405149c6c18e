use std::time::Duration;

use crate::error::FixtureError;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| hex::encode_upper([*value]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a captured frame written as hex, ignoring whitespace and `:` separators.
pub(crate) fn parse_hex(raw: &str) -> Result<Vec<u8>, FixtureError> {
    let compact: String = raw
        .chars()
        .filter(|character| !character.is_whitespace() && *character != ':')
        .collect();
    Ok(hex::decode(compact)?)
}

/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    match rssi {
        Some(value) => format!("{value} dBm"),
        None => "-".to_string(),
    }
}

/// Formats a wait for log and terminal output, dropping sub-second noise.
pub(crate) fn format_wait(wait: Duration) -> String {
    humantime::format_duration(Duration::from_secs(wait.as_secs())).to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("DD A5 03 00 FF FD 77", format_hex(&[0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77]));
    }

    #[rstest]
    #[case("dd a5 03 00 ff fd 77")]
    #[case("DDA50300FFFD77")]
    #[case("DD:A5:03:00:FF:FD:77\n")]
    fn parse_hex_accepts_common_capture_layouts(#[case] raw: &str) {
        assert_eq!(
            vec![0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77],
            parse_hex(raw).expect("hex should parse")
        );
    }

    #[test]
    fn parse_hex_rejects_odd_digit_count() {
        assert_matches!(parse_hex("DD A"), Err(FixtureError::InvalidHex(_)));
    }

    #[rstest]
    #[case(Some(-61), "-61 dBm")]
    #[case(None, "-")]
    fn format_rssi_renders_missing_values(#[case] rssi: Option<i16>, #[case] expected: &str) {
        assert_eq!(expected, format_rssi(rssi));
    }

    #[test]
    fn format_wait_drops_fractional_seconds() {
        assert_eq!("1m 30s", format_wait(Duration::from_millis(90_400)));
    }
}
