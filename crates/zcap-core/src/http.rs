//! HTTP clients for the remote collaborators: provenance API, ledger
//! JSON-RPC and the threshold-encryption bridge.
#![cfg(feature = "http")]

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use zcap_crypto::utils::b64_encode;
use zcap_crypto::wallet::WalletKey;

use crate::api::{AccessNftRequest, ApiReply, ErrorBody, NonceResponse, ProvenanceApi};
use crate::errors::{ApiError, EscrowError, LedgerError};
use crate::ledger::{encode_balance_of, encode_decimals, parse_quantity, Ledger};
use crate::payload::CapturePayload;
use crate::platform::{EncryptionResult, EscrowNetwork, EscrowSession, SessionIdentity};

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()
}

// ============================================================================
// Provenance API
// ============================================================================

#[derive(Clone)]
pub struct HttpProvenanceApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProvenanceApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = build_client(timeout).map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ProvenanceApi for HttpProvenanceApi {
    async fn fetch_nonce(&self, key_id: &str, public_key_b64: &str) -> Result<String, ApiError> {
        let url = format!("{}/nonce", self.base_url);
        let resp = self
            .client
            .get(url)
            .query(&[("key", key_id), ("publicKey", public_key_b64)])
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| ApiError::Http(e.to_string()))?;
        if status != StatusCode::OK {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: ErrorBody::message_from(&body),
            });
        }
        let parsed: NonceResponse =
            serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(parsed.nonce)
    }

    async fn submit_access_nft(&self, request: &AccessNftRequest) -> Result<ApiReply, ApiError> {
        let url = format!("{}/access_nft", self.base_url);
        debug!(key_id = %request.key_id, "submitting onboarding request");
        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(ApiReply { status, body })
    }

    async fn publish(&self, payload: &CapturePayload) -> Result<(), ApiError> {
        let url = format!("{}/publish", self.base_url);
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.bytes().await.map_err(|e| ApiError::Http(e.to_string()))?;
        Err(ApiError::Status {
            status: status.as_u16(),
            message: ErrorBody::message_from(&body),
        })
    }
}

// ============================================================================
// Ledger JSON-RPC
// ============================================================================

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Clone)]
pub struct JsonRpcLedger {
    rpc_url: String,
    client: reqwest::Client,
}

impl JsonRpcLedger {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = build_client(timeout).map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            client,
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<String, LedgerError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let resp: RpcResponse<String> = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        if let Some(err) = resp.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        resp.result
            .ok_or_else(|| LedgerError::InvalidResponse(format!("{} returned no result", method)))
    }

    async fn eth_call(&self, to: &str, data: String) -> Result<u128, LedgerError> {
        let result = self
            .call("eth_call", serde_json::json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        parse_quantity(&result)
    }
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn native_balance(&self, address: &str) -> Result<u128, LedgerError> {
        let result = self
            .call("eth_getBalance", serde_json::json!([address, "latest"]))
            .await?;
        parse_quantity(&result)
    }

    async fn token_balance(&self, contract: &str, address: &str) -> Result<u128, LedgerError> {
        self.eth_call(contract, encode_balance_of(address)?).await
    }

    async fn token_decimals(&self, contract: &str) -> Result<u8, LedgerError> {
        let raw = self.eth_call(contract, encode_decimals()).await?;
        u8::try_from(raw).map_err(|_| LedgerError::InvalidResponse(format!("decimals out of range: {}", raw)))
    }
}

// ============================================================================
// Threshold-encryption bridge
// ============================================================================

/// Message signed by the wallet to open a bridge session.
pub fn session_auth_message(address: &str, issued_at: i64) -> String {
    format!("zcap escrow session\naddress: {}\nissued_at: {}", address, issued_at)
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    address: &'a str,
    issued_at: i64,
    signature: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    session_id: &'a str,
    data: String,
}

/// Client for a bridge service that fronts the threshold-encryption network.
#[derive(Clone)]
pub struct HttpEscrowBridge {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEscrowBridge {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = build_client(timeout).map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl EscrowNetwork for HttpEscrowBridge {
    async fn connect(
        &self,
        identity: &SessionIdentity,
    ) -> Result<Box<dyn EscrowSession>, EscrowError> {
        let key = WalletKey::from_bytes(identity.private_key.as_ref())
            .map_err(|e| EscrowError::SessionFailed(e.to_string()))?;
        let issued_at = Utc::now().timestamp();
        let signature = key
            .sign_personal_message_hex(session_auth_message(&identity.address, issued_at).as_bytes())
            .map_err(|e| EscrowError::SessionFailed(e.to_string()))?;

        let resp = self
            .client
            .post(format!("{}/v1/session", self.base_url))
            .json(&SessionRequest {
                address: &identity.address,
                issued_at,
                signature,
            })
            .send()
            .await
            .map_err(|e| EscrowError::SessionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EscrowError::SessionFailed(format!(
                "status={} body={:?}",
                resp.status(),
                resp.text().await.ok()
            )));
        }
        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| EscrowError::InvalidResponse(e.to_string()))?;

        debug!("escrow session established");
        Ok(Box::new(HttpEscrowSession {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            session_id: session.session_id,
        }))
    }
}

struct HttpEscrowSession {
    base_url: String,
    client: reqwest::Client,
    session_id: String,
}

#[async_trait]
impl EscrowSession for HttpEscrowSession {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionResult, EscrowError> {
        let resp = self
            .client
            .post(format!("{}/v1/encrypt", self.base_url))
            .json(&EncryptRequest {
                session_id: &self.session_id,
                data: b64_encode(plaintext),
            })
            .send()
            .await
            .map_err(|e| EscrowError::EncryptFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EscrowError::EncryptFailed(format!(
                "status={} body={:?}",
                resp.status(),
                resp.text().await.ok()
            )));
        }
        resp.json()
            .await
            .map_err(|e| EscrowError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = HttpProvenanceApi::new("https://api.test/", Duration::from_secs(5)).unwrap();
        assert_eq!(api.base_url, "https://api.test");
        let bridge = HttpEscrowBridge::new("http://127.0.0.1:8787//", Duration::from_secs(5)).unwrap();
        assert_eq!(bridge.base_url, "http://127.0.0.1:8787");
    }

    #[test]
    fn test_session_auth_message_binds_address_and_time() {
        let msg = session_auth_message("0xabc", 1_700_000_000);
        assert!(msg.contains("0xabc"));
        assert!(msg.ends_with("issued_at: 1700000000"));
    }

    #[test]
    fn test_rpc_response_shapes() {
        let ok: RpcResponse<String> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap();
        assert_eq!(ok.result.as_deref(), Some("0x10"));
        let err: RpcResponse<String> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#,
        )
        .unwrap();
        let err = err.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "execution reverted");
    }
}
