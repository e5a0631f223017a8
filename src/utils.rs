use anyhow::Context;

/// Parses a hex dump such as `01 04 14 08 fc ...` or `010414...`.
/// Whitespace and `:` separators are ignored.
pub fn hex_to_bytes(input: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();

    hex::decode(&digits).context(format!("Invalid hex input '{}'", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spaced_and_packed_hex() {
        assert_eq!(hex_to_bytes("01 04 0A").unwrap(), vec![0x01, 0x04, 0x0a]);
        assert_eq!(hex_to_bytes("01:42:80:11").unwrap(), vec![0x01, 0x42, 0x80, 0x11]);
        assert_eq!(hex_to_bytes("70 0d").unwrap(), vec![0x70, 0x0d]);
        assert_eq!(hex_to_bytes("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(hex_to_bytes("014").is_err());
        assert!(hex_to_bytes("zz").is_err());
    }

    #[test]
    fn errors_name_the_offending_input() {
        let err = hex_to_bytes("01 0g").unwrap_err();
        assert_eq!(err.to_string(), "Invalid hex input '01 0g'");
    }
}
