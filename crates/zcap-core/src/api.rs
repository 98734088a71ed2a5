//! Remote provenance API: challenge nonces, device onboarding and publish.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ApiError;
use crate::payload::CapturePayload;

/// Raw reply from the onboarding endpoint. Status handling is the caller's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiReply {
    pub status: u16,
    pub body: Bytes,
}

#[async_trait]
pub trait ProvenanceApi: Send + Sync {
    /// `GET /nonce?key=…&publicKey=…`, legacy challenge mode only.
    async fn fetch_nonce(&self, key_id: &str, public_key_b64: &str) -> Result<String, ApiError>;

    /// `POST /access_nft`.
    async fn submit_access_nft(&self, request: &AccessNftRequest) -> Result<ApiReply, ApiError>;

    /// `POST /publish`. Non-2xx replies surface the server's error string.
    async fn publish(&self, payload: &CapturePayload) -> Result<(), ApiError>;
}

// ============================================================================
// Wire types
// ============================================================================

/// Onboarding request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessNftRequest {
    pub secp256r1_pubkey: String,
    pub ethereum_address: String,
    pub lit_ciphertext: String,
    pub lit_hash: String,
    /// Base64 of the challenge hash.
    pub challenge_data: String,
    pub challenge_data_plain: String,
    /// Base64 attestation statement.
    pub attestation_receipt: String,
    pub key_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AccessNftResponse {
    pub irys: IrysReceipt,
    pub nft: NftReceipt,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IrysReceipt {
    pub id: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NftReceipt {
    pub hash: String,
    #[serde(rename = "tokenId", deserialize_with = "string_or_number")]
    pub token_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
}

/// Error body of a failed publish.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

impl ErrorBody {
    /// Best human-readable message from an error reply body.
    pub fn message_from(body: &[u8]) -> String {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(ErrorBody { error: Some(e), .. }) => e,
            Ok(ErrorBody { message: Some(m), .. }) => m,
            _ => String::from_utf8_lossy(body).trim().to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
