//! Cache key derivation for request descriptors.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::descriptor::RequestDescriptor;

/// SHA-256 hex digest of the descriptor's JSON serialization.
///
/// Serialization follows field and insertion order, so two descriptors that
/// differ only in the order their headers (or body keys) were added get
/// different keys. The HTTP method is not part of the key.
pub fn fingerprint(descriptor: &RequestDescriptor) -> Result<String> {
    let canonical =
        serde_json::to_string(descriptor).context("Failed to serialize request descriptor")?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Fallback;
    use serde_json::json;

    #[test]
    fn test_fingerprint_matches_digest_of_serialized_descriptor() {
        let key = fingerprint(&RequestDescriptor::new("http://example.com")).unwrap();
        assert_eq!(
            key,
            "42989840cf9315b45fd071af8b77d5d2f5e86ed8db9e10fa42fcfbe5318609f6"
        );
    }

    #[test]
    fn test_fingerprint_covers_body_and_cache_fields() {
        let descriptor = RequestDescriptor::new("http://example.com")
            .data(json!({}))
            .cache(60);
        assert_eq!(
            fingerprint(&descriptor).unwrap(),
            "78852f1d2f5261d9a297252faf8d917508928dff7fd9c441b8046bf09155d0fa"
        );
    }

    #[test]
    fn test_identical_descriptors_share_a_key() {
        let a = RequestDescriptor::new("http://example.com")
            .header("x-test", "test")
            .params(json!({"page": 1}));
        let b = a.clone();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_different_params_give_different_keys() {
        let a = RequestDescriptor::new("http://example.com").params(json!({"page": 1}));
        let b = RequestDescriptor::new("http://example.com").params(json!({"page": 2}));
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_header_insertion_order_changes_the_key() {
        let a = RequestDescriptor::new("http://example.com")
            .header("x-a", "1")
            .header("x-b", "2");
        let b = RequestDescriptor::new("http://example.com")
            .header("x-b", "2")
            .header("x-a", "1");
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_resolver_fallback_does_not_affect_the_key() {
        let plain = RequestDescriptor::new("http://example.com");
        let with_resolver = plain
            .clone()
            .fallback(Fallback::resolver(|_, _| async { Ok::<_, anyhow::Error>(json!(null)) }));
        assert_eq!(
            fingerprint(&plain).unwrap(),
            fingerprint(&with_resolver).unwrap()
        );

        let with_literal = plain.clone().fallback(Fallback::literal(json!({"ok": false})));
        assert_ne!(
            fingerprint(&plain).unwrap(),
            fingerprint(&with_literal).unwrap()
        );
    }

    #[test]
    fn test_key_is_fixed_length_hex() {
        let key = fingerprint(&RequestDescriptor::new("http://example.com/some/long/path"))
            .unwrap();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
