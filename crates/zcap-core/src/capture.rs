//! Per-capture signing.
//!
//! The payload digest is the SHA-256 of the content's hash input. The wallet
//! signs the hex digest string (EIP-191), the hardware key signs the raw
//! digest bytes. Both signatures are started together and the payload is
//! only assembled once both have finished.

use std::sync::Arc;

use tracing::{debug, info};

use zcap_crypto::device::verify_device_signature;
use zcap_crypto::hash::sha256;
use zcap_crypto::utils::{b64_decode, b64_encode, constant_time_compare};
use zcap_crypto::wallet::verify_personal_signature;

use crate::api::ProvenanceApi;
use crate::content_key::ContentKeyManager;
use crate::device_identity::DeviceIdentityKeyManager;
use crate::errors::CaptureError;
use crate::payload::{
    CaptureMetadata, CapturePayload, ContentValue, MediaContent, PrivateContent, SignatureBlock,
    Visibility,
};
use crate::wallet::WalletKeyManager;

/// Input for one capture.
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub visibility: Visibility,
    pub media: Vec<u8>,
    /// Unix seconds.
    pub timestamp: i64,
}

pub struct CapturePayloadSigner {
    device: Arc<DeviceIdentityKeyManager>,
    wallet: Arc<WalletKeyManager>,
    content: Arc<ContentKeyManager>,
}

impl CapturePayloadSigner {
    pub fn new(
        device: Arc<DeviceIdentityKeyManager>,
        wallet: Arc<WalletKeyManager>,
        content: Arc<ContentKeyManager>,
    ) -> Self {
        Self {
            device,
            wallet,
            content,
        }
    }

    /// Build and sign the payload for one capture.
    pub async fn sign_capture(&self, request: &CaptureRequest) -> Result<CapturePayload, CaptureError> {
        let media = MediaContent {
            mediadata: b64_encode(&request.media),
            metadata: CaptureMetadata {
                timestamp: request.timestamp,
            },
        };
        let content = match request.visibility {
            Visibility::Public => ContentValue::Public(media),
            Visibility::Private => {
                let json = serde_json::to_vec(&media)
                    .map_err(|e| CaptureError::Serialization(e.to_string()))?;
                let sealed = self.content.encrypt(&json).map_err(CaptureError::Encryption)?;
                ContentValue::Private(PrivateContent {
                    encrypted: b64_encode(&sealed),
                })
            }
        };

        let digest = sha256(content.hash_input().as_bytes());
        let digest_hex = hex::encode(digest);

        let hardware_public_key = self
            .device
            .public_key_base64()?
            .ok_or(CaptureError::MissingIdentity("hardware key"))?;
        let address = self
            .wallet
            .stored_address()?
            .ok_or(CaptureError::MissingIdentity("wallet"))?;

        let (wallet_signature, hardware_signature) = tokio::try_join!(
            async {
                self.wallet
                    .sign_message(&digest_hex)
                    .await
                    .map_err(CaptureError::WalletSignature)
            },
            async {
                self.device
                    .sign(&digest)
                    .await
                    .map_err(CaptureError::HardwareSignature)
            },
        )?;

        debug!(visibility = %request.visibility, sha256 = %digest_hex, "signed capture");
        Ok(CapturePayload {
            content,
            sha256: digest_hex,
            eth: SignatureBlock {
                pubkey: address,
                signature: wallet_signature,
            },
            secp256r1: SignatureBlock {
                pubkey: hardware_public_key,
                signature: b64_encode(&hardware_signature),
            },
        })
    }

    /// Recover `{mediadata, metadata}` from a private payload with this
    /// device's content key.
    pub fn decrypt_private_content(&self, payload: &CapturePayload) -> Result<MediaContent, CaptureError> {
        let ContentValue::Private(sealed) = &payload.content else {
            return Err(CaptureError::Verification("payload is not private".into()));
        };
        let ciphertext = b64_decode(&sealed.encrypted)
            .map_err(|e| CaptureError::Verification(format!("encrypted is not base64: {}", e)))?;
        let json = self.content.decrypt(&ciphertext)?;
        serde_json::from_slice(&json).map_err(|e| CaptureError::Serialization(e.to_string()))
    }
}

/// Check a payload's digest and both signatures. Needs no key material.
pub fn verify_payload(payload: &CapturePayload) -> Result<(), CaptureError> {
    let digest = sha256(payload.content.hash_input().as_bytes());
    let expected_hex = hex::encode(digest);
    if !constant_time_compare(expected_hex.as_bytes(), payload.sha256.to_ascii_lowercase().as_bytes()) {
        return Err(CaptureError::Verification("sha256 does not match content".into()));
    }

    if !verify_personal_signature(payload.sha256.as_bytes(), &payload.eth.signature, &payload.eth.pubkey) {
        return Err(CaptureError::Verification("wallet signature invalid".into()));
    }

    let public_key = b64_decode(&payload.secp256r1.pubkey)
        .map_err(|_| CaptureError::Verification("hardware public key is not base64".into()))?;
    let signature = b64_decode(&payload.secp256r1.signature)
        .map_err(|_| CaptureError::Verification("hardware signature is not base64".into()))?;
    verify_device_signature(&public_key, &digest, &signature)
        .map_err(|e| CaptureError::Verification(format!("hardware signature: {}", e)))
}

/// Hands signed payloads to the publish endpoint.
pub struct CapturePublisher {
    api: Arc<dyn ProvenanceApi>,
}

impl CapturePublisher {
    pub fn new(api: Arc<dyn ProvenanceApi>) -> Self {
        Self { api }
    }

    pub async fn publish(&self, payload: &CapturePayload) -> Result<(), CaptureError> {
        self.api.publish(payload).await?;
        info!(sha256 = %payload.sha256, "published capture");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::TestRig;

    #[tokio::test]
    async fn test_sign_requires_identity() {
        let rig = TestRig::new();
        let request = CaptureRequest {
            visibility: Visibility::Public,
            media: vec![1, 2, 3],
            timestamp: 10,
        };
        let err = rig.services.signer.sign_capture(&request).await.unwrap_err();
        assert_eq!(err, CaptureError::MissingIdentity("hardware key"));
    }

    #[tokio::test]
    async fn test_public_payload_verifies() {
        let rig = TestRig::new();
        rig.bootstrap().await;
        let request = CaptureRequest {
            visibility: Visibility::Public,
            media: b"jpeg".to_vec(),
            timestamp: 1_700_000_000,
        };
        let payload = rig.services.signer.sign_capture(&request).await.unwrap();
        verify_payload(&payload).unwrap();
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let rig = TestRig::new();
        rig.bootstrap().await;
        let request = CaptureRequest {
            visibility: Visibility::Public,
            media: b"jpeg".to_vec(),
            timestamp: 1,
        };
        let mut payload = rig.services.signer.sign_capture(&request).await.unwrap();
        if let ContentValue::Public(media) = &mut payload.content {
            media.metadata.timestamp = 2;
        }
        assert!(matches!(verify_payload(&payload), Err(CaptureError::Verification(_))));
    }

    #[tokio::test]
    async fn test_decrypt_rejects_public_payload() {
        let rig = TestRig::new();
        rig.bootstrap().await;
        let request = CaptureRequest {
            visibility: Visibility::Public,
            media: vec![9],
            timestamp: 1,
        };
        let payload = rig.services.signer.sign_capture(&request).await.unwrap();
        assert!(rig.services.signer.decrypt_private_content(&payload).is_err());
    }

    #[tokio::test]
    async fn test_private_capture_without_content_key() {
        let rig = TestRig::new();
        rig.services.device.ensure_key().await.unwrap();
        rig.services.wallet.create_or_load_wallet().unwrap();
        let request = CaptureRequest {
            visibility: Visibility::Private,
            media: vec![9],
            timestamp: 1,
        };
        let err = rig.services.signer.sign_capture(&request).await.unwrap_err();
        assert!(matches!(err, CaptureError::Encryption(_)));
    }
}
