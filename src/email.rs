//! RFC822 assembly for outgoing mail
//!
//! The Gmail API accepts outgoing messages as a single base64url-encoded
//! RFC822 blob in the `raw` field, for both send and draft operations.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Build the `raw` payload for a plain-text message
///
/// Produces minimal headers plus the body, encoded base64url without padding
/// as the API requires.
pub fn make_raw_message(to: &str, subject: &str, body: &str) -> String {
    let message = format!(
        "To: {to}\nSubject: {subject}\nMIME-Version: 1.0\nContent-Type: text/plain; charset=utf-8\n\n{body}"
    );
    URL_SAFE_NO_PAD.encode(message)
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::make_raw_message;

    #[test]
    fn encodes_headers_and_body_base64url() {
        let raw = make_raw_message("dest@example.com", "Greetings", "Hello there");
        assert!(!raw.contains('+') && !raw.contains('/') && !raw.contains('='));

        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
        assert!(decoded.starts_with("To: dest@example.com\nSubject: Greetings\n"));
        assert!(decoded.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(decoded.ends_with("\n\nHello there"));
    }
}
