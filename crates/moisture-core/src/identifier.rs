//! Hardware identifier helpers.
//!
//! Sensors announce themselves with a MAC-shaped token
//! (`aa:bb:cc:dd:ee:ff`). Identifiers are compared case-insensitively.

/// Length of a `xx:xx:xx:xx:xx:xx` identifier.
pub const IDENTIFIER_LEN: usize = 17;

/// Return the first MAC-shaped window in `line`, case preserved.
pub fn extract_identifier(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    if bytes.len() < IDENTIFIER_LEN {
        return None;
    }

    (0..=bytes.len() - IDENTIFIER_LEN)
        .find(|&start| is_identifier_window(&bytes[start..start + IDENTIFIER_LEN]))
        // The window is pure ASCII, so both ends sit on char boundaries.
        .map(|start| &line[start..start + IDENTIFIER_LEN])
}

/// Case-insensitive identifier comparison.
pub fn identifiers_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn is_identifier_window(window: &[u8]) -> bool {
    window.iter().enumerate().all(|(i, &c)| {
        if i % 3 == 2 {
            c == b':'
        } else {
            c.is_ascii_hexdigit()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_embedded() {
        assert_eq!(
            extract_identifier("boot ok aa:bb:cc:dd:ee:ff ready"),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn test_extract_preserves_case() {
        assert_eq!(
            extract_identifier("MAC=70:55:8A:11:2b:3C"),
            Some("70:55:8A:11:2b:3C")
        );
    }

    #[test]
    fn test_extract_first_match_wins() {
        assert_eq!(
            extract_identifier("00:11:22:33:44:55 then 66:77:88:99:aa:bb"),
            Some("00:11:22:33:44:55")
        );
    }

    #[test]
    fn test_extract_skips_near_misses() {
        // Bad separators and a short group leave only the second token.
        assert_eq!(
            extract_identifier("aa-bb-cc:dd:ee:ff:0 11:22:33:44:55:66"),
            Some("11:22:33:44:55:66")
        );
        assert_eq!(extract_identifier("gg:bb:cc:dd:ee:ff"), None);
        assert_eq!(extract_identifier("aa:bb:cc:dd:ee:f"), None);
        assert_eq!(extract_identifier(""), None);
        assert_eq!(extract_identifier("no identifier here at all"), None);
    }

    #[test]
    fn test_extract_with_multibyte_text() {
        assert_eq!(
            extract_identifier("Capteur prêt → de:ad:be:ef:00:01 ✓"),
            Some("de:ad:be:ef:00:01")
        );
    }

    #[test]
    fn test_window_must_be_complete() {
        assert_eq!(extract_identifier("CMD: set D0 = 1"), None);
        assert_eq!(
            extract_identifier("aa:bb:cc:dd:ee:ff "),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn test_identifiers_match_ignores_case() {
        assert!(identifiers_match("AA:BB:cc:dd:ee:ff", "aa:bb:CC:DD:EE:FF"));
        assert!(!identifiers_match("aa:bb:cc:dd:ee:ff", "aa:bb:cc:dd:ee:00"));
    }
}
