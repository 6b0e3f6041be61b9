//! Credential redaction for errors and log output.

use crate::descriptor::Headers;
use crate::http::TransportError;

/// Lowercased names of headers whose values must never be logged or returned.
pub const SENSITIVE_HEADERS: [&str; 2] = ["authorization", "x-api-key"];

/// Replacement written over sensitive header values.
pub const MASK: &str = "xxxxxxxxxxxxx";

pub fn is_sensitive(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&name.as_str())
}

/// Masks every sensitive header in place.
pub fn redact_headers(headers: &mut Headers) {
    for (name, value) in headers.iter_mut() {
        if is_sensitive(name) {
            *value = Some(MASK.to_string());
        }
    }
}

/// Masks sensitive headers in every context an error carries.
///
/// Must run before the error is logged or handed to anyone.
pub fn redact(error: &mut TransportError) {
    let contexts = [
        error.request.as_mut().map(|request| &mut request.headers),
        error.config.as_mut().map(|config| &mut config.headers),
    ];

    for headers in contexts.into_iter().flatten() {
        redact_headers(headers);
    }
}
