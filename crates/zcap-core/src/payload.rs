//! Capture payload wire format.
//!
//! ```json
//! {"content":{"type":"public","value":{"mediadata":"<b64>","metadata":{"timestamp":1700000000}}},
//!  "sha256":"<hex>",
//!  "eth":{"pubkey":"0x…","signature":"0x…"},
//!  "secp256r1":{"pubkey":"<b64>","signature":"<b64>"}}
//! ```

use serde::{Deserialize, Serialize};

use zcap_crypto::canonical::{fields, CanonicalFields};

/// Content visibility mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        })
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Unix seconds.
    pub timestamp: i64,
}

/// Media and its metadata, as published in public mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaContent {
    /// Base64 of the media bytes.
    pub mediadata: String,
    pub metadata: CaptureMetadata,
}

impl MediaContent {
    /// Key-sorted query string hashed for public content.
    pub fn canonical_string(&self) -> String {
        let mut f = CanonicalFields::new();
        f.append(fields::MEDIADATA, &self.mediadata)
            .append(fields::METADATA_TIMESTAMP, self.metadata.timestamp.to_string());
        f.to_canonical_string()
    }
}

/// Sealed media, as published in private mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateContent {
    /// Base64 of the content-key ciphertext of the JSON `MediaContent`.
    pub encrypted: String,
}

/// Exactly one of the two content shapes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ContentValue {
    Public(MediaContent),
    Private(PrivateContent),
}

impl ContentValue {
    pub fn visibility(&self) -> Visibility {
        match self {
            ContentValue::Public(_) => Visibility::Public,
            ContentValue::Private(_) => Visibility::Private,
        }
    }

    /// The string whose SHA-256 is the payload digest.
    pub fn hash_input(&self) -> String {
        match self {
            ContentValue::Public(media) => media.canonical_string(),
            ContentValue::Private(sealed) => sealed.encrypted.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub pubkey: String,
    pub signature: String,
}

/// One signed capture, ready to publish. Never persisted by the core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturePayload {
    pub content: ContentValue,
    /// Lowercase hex SHA-256 of `content.hash_input()`.
    pub sha256: String,
    /// Wallet address and its EIP-191 signature of `sha256` (the hex string).
    pub eth: SignatureBlock,
    /// Hardware public key and its DER signature of the raw digest bytes.
    pub secp256r1: SignatureBlock,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media() -> MediaContent {
        MediaContent {
            mediadata: "AAEC".into(),
            metadata: CaptureMetadata {
                timestamp: 1_700_000_000,
            },
        }
    }

    #[test]
    fn test_public_canonical_string() {
        assert_eq!(
            media().canonical_string(),
            "mediadata=AAEC&metadata.timestamp=1700000000"
        );
    }

    #[test]
    fn test_content_value_json_shape() {
        let v = serde_json::to_value(ContentValue::Public(media())).unwrap();
        assert_eq!(v["type"], "public");
        assert_eq!(v["value"]["mediadata"], "AAEC");
        assert_eq!(v["value"]["metadata"]["timestamp"], 1_700_000_000i64);

        let v = serde_json::to_value(ContentValue::Private(PrivateContent {
            encrypted: "c2VhbGVk".into(),
        }))
        .unwrap();
        assert_eq!(v["type"], "private");
        assert_eq!(v["value"]["encrypted"], "c2VhbGVk");
        assert!(v["value"].get("mediadata").is_none());
    }

    #[test]
    fn test_private_hash_input_is_ciphertext() {
        let v = ContentValue::Private(PrivateContent {
            encrypted: "abc=".into(),
        });
        assert_eq!(v.hash_input(), "abc=");
        assert_eq!(v.visibility(), Visibility::Private);
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!("PRIVATE".parse::<Visibility>().unwrap(), Visibility::Private);
        assert!("secret".parse::<Visibility>().is_err());
    }
}
