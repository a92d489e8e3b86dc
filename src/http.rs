//! HTTP label normalization for the request counter (§4.4, §6).
//!
//! Request records carry whatever method/result strings the app biflow record reported; neither is
//! guaranteed to be one of a known set (case varies, unrecognized verbs show up, routers report
//! result codes outside 1xx-5xx). Both normalizers collapse their input to a small, finite label
//! space so `requests_total` never grows an unbounded cardinality of label values.

/// Canonical HTTP methods recognized as distinct label values; anything else normalizes to
/// `"unknown"`.
const METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

/// Case-insensitively matches `method` against the canonical method list.
pub fn normalize_method(method: &str) -> &'static str {
    for &m in METHODS {
        if method.eq_ignore_ascii_case(m) {
            return m;
        }
    }
    "unknown"
}

/// Collapses an HTTP response code string (e.g. `"204"`) to its status class (`"2xx"`), or
/// `"unknown"` if `code` isn't a recognized three-digit code.
pub fn normalize_response_class(code: &str) -> &'static str {
    let bytes = code.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_digit) {
        return "unknown";
    }
    match bytes[0] {
        b'1' => "1xx",
        b'2' => "2xx",
        b'3' => "3xx",
        b'4' => "4xx",
        b'5' => "5xx",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_methods_case_insensitively() {
        assert_eq!(normalize_method("get"), "GET");
        assert_eq!(normalize_method("Post"), "POST");
        assert_eq!(normalize_method("PATCH"), "PATCH");
    }

    #[test]
    fn unknown_method_falls_back() {
        assert_eq!(normalize_method("BREW"), "unknown");
        assert_eq!(normalize_method(""), "unknown");
    }

    #[test]
    fn normalizes_response_classes() {
        assert_eq!(normalize_response_class("204"), "2xx");
        assert_eq!(normalize_response_class("404"), "4xx");
        assert_eq!(normalize_response_class("503"), "5xx");
    }

    #[test]
    fn malformed_codes_are_unknown() {
        assert_eq!(normalize_response_class("abc"), "unknown");
        assert_eq!(normalize_response_class("20"), "unknown");
        assert_eq!(normalize_response_class("2000"), "unknown");
        assert_eq!(normalize_response_class(""), "unknown");
    }
}
