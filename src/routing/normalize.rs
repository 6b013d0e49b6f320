//! Request path canonicalization.
//!
//! # Responsibilities
//! - Decode percent-escapes exactly once per segment
//! - Resolve `.` and `..` segments against the root (clamped at `/`)
//! - Collapse repeated separators
//!
//! # Design Decisions
//! - Only a literal `/` separates segments; a decoded `%2F` stays inside its segment
//! - Decoded segments are re-encoded (`%`, `/`, controls, non-ASCII) so the
//!   canonical form is unambiguous and normalizing it again is a no-op
//! - Only literal `.` and `..` are dot segments; escaped dots such as `%2e%2e`
//!   stay an ordinary segment with the dots kept escaped
//! - A double-escaped sequence such as `%252e%252e` decodes to the literal
//!   text `%2e%2e`, which is never treated as a dot segment

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};

/// Bytes re-escaped inside a canonical segment.
const SEGMENT: &AsciiSet = &CONTROLS.add(b'%').add(b'/');

/// Normalize a raw request path (no query string) into its canonical form.
///
/// The result always starts with `/`. A trailing slash on a non-root path is kept.
pub fn normalize(raw_path: &str) -> String {
    let mut segments: Vec<String> = Vec::new();

    for raw in raw_path.split('/') {
        if raw.is_empty() {
            continue;
        }

        match raw {
            "." => {}
            ".." => {
                // Clamped: popping an empty stack keeps us at the root.
                segments.pop();
            }
            _ => segments.push(encode_segment(raw)),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut canonical = String::with_capacity(raw_path.len());
    for segment in &segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if raw_path.ends_with('/') {
        canonical.push('/');
    }
    canonical
}

fn encode_segment(raw: &str) -> String {
    let decoded: Vec<u8> = percent_decode_str(raw).collect();
    match decoded.as_slice() {
        // An escaped dot segment must not turn into a real one on the next pass.
        b"." => "%2E".to_string(),
        b".." => "%2E%2E".to_string(),
        bytes => percent_encode(bytes, SEGMENT).to_string(),
    }
}
