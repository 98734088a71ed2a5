//! Canonical key-sorted serialization.
//!
//! Client and server must hash byte-identical strings, so fields are kept in a
//! sorted map and rendered as `key=value` pairs joined with `&`. Values are not
//! percent-encoded: base64 and hex values are carried verbatim.

use std::collections::BTreeMap;

use crate::hash::sha256;

/// Field names used in the attestation challenge. They double as the
/// onboarding request field names the server recomputes the hash from.
pub mod fields {
    pub const SECP256R1_PUBKEY: &str = "secp256r1_pubkey";
    pub const ETHEREUM_ADDRESS: &str = "ethereum_address";
    pub const LIT_CIPHERTEXT: &str = "lit_ciphertext";
    pub const LIT_HASH: &str = "lit_hash";

    pub const MEDIADATA: &str = "mediadata";
    pub const METADATA_TIMESTAMP: &str = "metadata.timestamp";
}

/// A set of key/value pairs with a deterministic string form.
///
/// Insertion order never affects the output; a repeated key replaces the
/// earlier value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanonicalFields {
    fields: BTreeMap<String, String>,
}

impl CanonicalFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any previous value under the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as `k1=v1&k2=v2`, keys in byte order.
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    /// SHA-256 over the UTF-8 bytes of the canonical string.
    pub fn digest(&self) -> [u8; 32] {
        sha256(self.to_canonical_string().as_bytes())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CanonicalFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut c = CanonicalFields::new();
        for (k, v) in iter {
            c.append(k, v);
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_sorted() {
        let mut c = CanonicalFields::new();
        c.append(fields::SECP256R1_PUBKEY, "pk")
            .append(fields::LIT_HASH, "h")
            .append(fields::ETHEREUM_ADDRESS, "0xabc")
            .append(fields::LIT_CIPHERTEXT, "ct");

        assert_eq!(
            c.to_canonical_string(),
            "ethereum_address=0xabc&lit_ciphertext=ct&lit_hash=h&secp256r1_pubkey=pk"
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a: CanonicalFields = [("b", "2"), ("a", "1"), ("c", "3")].into_iter().collect();
        let b: CanonicalFields = [("c", "3"), ("b", "2"), ("a", "1")].into_iter().collect();

        assert_eq!(a.to_canonical_string(), b.to_canonical_string());
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_values_are_not_escaped() {
        let mut c = CanonicalFields::new();
        c.append(fields::MEDIADATA, "ab+/cd==")
            .append(fields::METADATA_TIMESTAMP, "1700000000");

        assert_eq!(
            c.to_canonical_string(),
            "mediadata=ab+/cd==&metadata.timestamp=1700000000"
        );
    }

    #[test]
    fn test_repeated_key_replaces() {
        let mut c = CanonicalFields::new();
        c.append("k", "old").append("k", "new");
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("k"), Some("new"));
    }

    #[test]
    fn test_empty_is_empty_string() {
        let c = CanonicalFields::new();
        assert!(c.is_empty());
        assert_eq!(c.to_canonical_string(), "");
    }

    #[test]
    fn test_different_values_different_digest() {
        let a: CanonicalFields = [("k", "v1")].into_iter().collect();
        let b: CanonicalFields = [("k", "v2")].into_iter().collect();
        assert_ne!(a.digest(), b.digest());
    }
}
