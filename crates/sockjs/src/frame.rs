//! SockJS wire frames.
//!
//! Frames are short ASCII-prefixed JSON texts: `o` (open), `h` (heartbeat),
//! `a` followed by a JSON array of message strings, `m` followed by a single
//! JSON string, and `c[code,"reason"]` (close). JSON is strict RFC 8259 with
//! UTF-8, produced and parsed by `serde_json`.

use serde::Deserialize;

use crate::error::PayloadError;

/// The open frame, sent once when a session leaves `Opening`.
pub const OPEN_FRAME: &str = "o";

/// The heartbeat frame, emitted periodically while a receiver is attached.
pub const HEARTBEAT_FRAME: &str = "h";

/// Encodes messages as a single `a[...]` frame.
pub fn message_array(messages: &[String]) -> String {
    let mut frame = String::from("a");
    frame.push_str(&json_string(&messages));
    frame
}

/// Encodes one message as an `m"..."` frame (used by select transports that
/// deliver messages individually instead of batching into `a[...]`).
pub fn single_message(message: &str) -> String {
    let mut frame = String::from("m");
    frame.push_str(&json_string(&message));
    frame
}

/// Encodes a `c[code,"reason"]` close frame.
pub fn close_frame(code: i32, reason: &str) -> String {
    format!("c[{},{}]", code, json_string(&reason))
}

fn json_string<T: serde::Serialize>(value: &T) -> String {
    // strings and string slices serialize infallibly
    serde_json::to_string(value).expect("JSON string encoding cannot fail")
}

/// An inbound send-side payload: canonically a JSON array of strings, with a
/// bare JSON string accepted for compatibility.
#[derive(Deserialize)]
#[serde(untagged)]
enum InboundPayload {
    Many(Vec<String>),
    One(String),
}

/// Decodes a send-side request body into messages.
///
/// `serde_json` parses exactly one root value, so trailing garbage after the
/// array or string is rejected as [`PayloadError::Broken`]. An empty body is
/// the distinct [`PayloadError::Empty`].
pub fn decode_payload(body: &[u8]) -> Result<Vec<String>, PayloadError> {
    if body.is_empty() {
        return Err(PayloadError::Empty);
    }
    match serde_json::from_slice(body) {
        Ok(InboundPayload::Many(messages)) => Ok(messages),
        Ok(InboundPayload::One(message)) => Ok(vec![message]),
        Err(_) => Err(PayloadError::Broken),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn encodes_message_array() {
        assert_eq!(message_array(&msgs(&["foo", "bar"])), r#"a["foo","bar"]"#);
        assert_eq!(message_array(&msgs(&[""])), r#"a[""]"#);
    }

    #[test]
    fn encodes_single_message() {
        assert_eq!(single_message("foo"), r#"m"foo""#);
        assert_eq!(single_message(r#"say "hi""#), r#"m"say \"hi\"""#);
    }

    #[test]
    fn encodes_close_frame() {
        assert_eq!(close_frame(1, "some reason"), r#"c[1,"some reason"]"#);
        assert_eq!(
            close_frame(2010, "Another connection still open"),
            r#"c[2010,"Another connection still open"]"#
        );
    }

    #[test]
    fn array_round_trips_unicode() {
        let original = msgs(&["héllo", "嗨", "a\nb", "\u{1f600}"]);
        let frame = message_array(&original);
        let decoded = decode_payload(frame[1..].as_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decodes_array_payload() {
        assert_eq!(
            decode_payload(br#"["some message"]"#).unwrap(),
            msgs(&["some message"])
        );
        assert_eq!(decode_payload(b"[]").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn decodes_bare_string_payload() {
        assert_eq!(decode_payload(br#""hello""#).unwrap(), msgs(&["hello"]));
    }

    #[test]
    fn empty_payload_is_distinct_from_broken() {
        assert_eq!(decode_payload(b""), Err(PayloadError::Empty));
        assert_eq!(decode_payload(b"   "), Err(PayloadError::Broken));
    }

    #[test]
    fn rejects_broken_payloads() {
        assert_eq!(
            decode_payload(b"some invalid message frame"),
            Err(PayloadError::Broken)
        );
        // unexpected EOF
        assert_eq!(decode_payload(br#"["x"#), Err(PayloadError::Broken));
        // non-string elements
        assert_eq!(decode_payload(b"[1,2]"), Err(PayloadError::Broken));
        // not an array or string
        assert_eq!(decode_payload(br#"{"a":"b"}"#), Err(PayloadError::Broken));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert_eq!(decode_payload(br#"["a"] extra"#), Err(PayloadError::Broken));
        assert_eq!(decode_payload(br#""a""b""#), Err(PayloadError::Broken));
    }
}
