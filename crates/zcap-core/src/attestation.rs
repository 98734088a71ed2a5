//! Device attestation and registration.
//!
//! Flow: generate an attestation key, derive a challenge from the device's
//! public artifacts, have the platform attest the key over the challenge
//! hash, then trade the statement for an access credential. The credential
//! and the attestation key id together form the [`AttestationRecord`].
//!
//! A stored record only counts while the hardware key, the wallet and the
//! escrowed content key are all present as well. Presence is checked, not
//! mutual consistency.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use zcap_crypto::canonical::{fields, CanonicalFields};
use zcap_crypto::hash::sha256;
use zcap_crypto::utils::b64_encode;

use crate::api::{AccessNftRequest, AccessNftResponse, ApiReply, ErrorBody, ProvenanceApi};
use crate::content_key::{ContentKeyManager, EscrowedContentKey};
use crate::device_identity::DeviceIdentityKeyManager;
use crate::errors::AttestationError;
use crate::platform::AttestationService;
use crate::store::{accounts, CredentialStore, StoreKey};
use crate::wallet::WalletKeyManager;

// ============================================================================
// Types
// ============================================================================

/// How the attestation challenge is obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeMode {
    /// Derived locally from the canonical artifact string. No round trip.
    #[default]
    Canonical,
    /// Legacy: fetched from `GET /nonce`.
    ServerNonce,
}

/// Server-issued access credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub receipt_id: String,
    pub receipt_url: String,
    pub receipt_hash: String,
    pub token_id: String,
}

impl From<AccessNftResponse> for AccessCredential {
    fn from(r: AccessNftResponse) -> Self {
        Self {
            receipt_id: r.irys.id,
            receipt_url: r.irys.url,
            receipt_hash: r.nft.hash,
            token_id: r.nft.token_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttestationRecord {
    pub key_id: String,
    pub credential: AccessCredential,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum AttestationState {
    NoRecord,
    KeyGenerated,
    ChallengeIssued,
    Attested,
    Registered,
    Failed(String),
}

/// The public artifacts bound into the challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceArtifacts {
    /// Base64 uncompressed P-256 public key.
    pub hardware_public_key: String,
    pub wallet_address: String,
    pub escrow: EscrowedContentKey,
}

impl DeviceArtifacts {
    pub fn canonical_fields(&self) -> CanonicalFields {
        let mut f = CanonicalFields::new();
        f.append(fields::SECP256R1_PUBKEY, &self.hardware_public_key)
            .append(fields::ETHEREUM_ADDRESS, &self.wallet_address)
            .append(fields::LIT_CIPHERTEXT, &self.escrow.ciphertext)
            .append(fields::LIT_HASH, &self.escrow.data_to_encrypt_hash);
        f
    }
}

/// Attestation challenge: the plaintext and the hash the platform signs over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub plain: String,
    pub hash: [u8; 32],
}

impl Challenge {
    pub fn from_artifacts(artifacts: &DeviceArtifacts) -> Self {
        let f = artifacts.canonical_fields();
        Self {
            plain: f.to_canonical_string(),
            hash: f.digest(),
        }
    }

    pub fn from_nonce(nonce: &str) -> Self {
        Self {
            plain: nonce.to_string(),
            hash: sha256(nonce.as_bytes()),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct AttestationOrchestrator {
    store: Arc<dyn CredentialStore>,
    key_id_entry: StoreKey,
    credential_entry: StoreKey,
    device: Arc<DeviceIdentityKeyManager>,
    wallet: Arc<WalletKeyManager>,
    content: Arc<ContentKeyManager>,
    attestor: Arc<dyn AttestationService>,
    api: Arc<dyn ProvenanceApi>,
    mode: ChallengeMode,
    state: RwLock<AttestationState>,
    run_lock: Mutex<()>,
}

/// Component handles the orchestrator reads from.
pub struct AttestationDeps {
    pub device: Arc<DeviceIdentityKeyManager>,
    pub wallet: Arc<WalletKeyManager>,
    pub content: Arc<ContentKeyManager>,
    pub attestor: Arc<dyn AttestationService>,
    pub api: Arc<dyn ProvenanceApi>,
}

impl AttestationOrchestrator {
    pub fn new(store: Arc<dyn CredentialStore>, namespace: &str, deps: AttestationDeps) -> Self {
        Self {
            store,
            key_id_entry: StoreKey::new(namespace, accounts::ATTESTATION_KEY_ID),
            credential_entry: StoreKey::new(namespace, accounts::ACCESS_NFT),
            device: deps.device,
            wallet: deps.wallet,
            content: deps.content,
            attestor: deps.attestor,
            api: deps.api,
            mode: ChallengeMode::default(),
            state: RwLock::new(AttestationState::NoRecord),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_challenge_mode(mut self, mode: ChallengeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn state(&self) -> AttestationState {
        match self.state.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_state(&self, next: AttestationState) {
        debug!(state = ?next, "attestation state");
        match self.state.write() {
            Ok(mut s) => *s = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Return the attestation key id, registering the device first if no
    /// valid record exists.
    pub async fn attest_device_if_needed(&self) -> Result<String, AttestationError> {
        if let Some(record) = self.valid_record()? {
            self.set_state(AttestationState::Registered);
            return Ok(record.key_id);
        }

        let _guard = self.run_lock.lock().await;
        if let Some(record) = self.valid_record()? {
            self.set_state(AttestationState::Registered);
            return Ok(record.key_id);
        }

        match self.register().await {
            Ok(key_id) => Ok(key_id),
            Err(e) => {
                warn!(error = %e, "device attestation failed");
                self.set_state(AttestationState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn register(&self) -> Result<String, AttestationError> {
        self.set_state(AttestationState::NoRecord);
        let artifacts = self.collect_artifacts()?;

        if !self.attestor.is_supported() {
            return Err(AttestationError::Unsupported);
        }
        let key_id = self.attestor.generate_key().await.map_err(|e| match e {
            AttestationError::KeyGenFailed(_) | AttestationError::Unsupported => e,
            other => AttestationError::KeyGenFailed(other.to_string()),
        })?;
        self.set_state(AttestationState::KeyGenerated);

        let challenge = match self.mode {
            ChallengeMode::Canonical => Challenge::from_artifacts(&artifacts),
            ChallengeMode::ServerNonce => {
                let nonce = self
                    .api
                    .fetch_nonce(&key_id, &artifacts.hardware_public_key)
                    .await
                    .map_err(|e| AttestationError::NonceOrChallengeRetrievalFailed(e.to_string()))?;
                Challenge::from_nonce(&nonce)
            }
        };
        self.set_state(AttestationState::ChallengeIssued);

        let statement = self
            .attestor
            .attest_key(&key_id, &challenge.hash)
            .await
            .map_err(|e| match e {
                AttestationError::AttestationFailed(_) => e,
                other => AttestationError::AttestationFailed(other.to_string()),
            })?;
        self.set_state(AttestationState::Attested);

        let request = AccessNftRequest {
            secp256r1_pubkey: artifacts.hardware_public_key,
            ethereum_address: artifacts.wallet_address,
            lit_ciphertext: artifacts.escrow.ciphertext,
            lit_hash: artifacts.escrow.data_to_encrypt_hash,
            challenge_data: b64_encode(&challenge.hash),
            challenge_data_plain: challenge.plain,
            attestation_receipt: b64_encode(&statement),
            key_id,
        };
        let reply = self
            .api
            .submit_access_nft(&request)
            .await
            .map_err(|e| AttestationError::OnboardingFailed(e.to_string()))?;
        let credential = decode_onboarding_reply(&reply)?;

        let record = AttestationRecord {
            key_id: request.key_id,
            credential,
        };
        self.persist(&record)?;
        self.set_state(AttestationState::Registered);
        info!(key_id = %record.key_id, token_id = %record.credential.token_id, "device registered");
        Ok(record.key_id)
    }

    fn collect_artifacts(&self) -> Result<DeviceArtifacts, AttestationError> {
        let hardware_public_key = self
            .device
            .public_key_base64()?
            .ok_or(AttestationError::MissingArtifact("hardware public key"))?;
        let wallet_address = self
            .wallet
            .stored_address()?
            .ok_or(AttestationError::MissingArtifact("wallet address"))?;
        if !self.content.has_key() {
            return Err(AttestationError::MissingArtifact("content key"));
        }
        let escrow = self
            .content
            .escrow_record()?
            .ok_or(AttestationError::MissingArtifact("escrowed content key"))?;
        Ok(DeviceArtifacts {
            hardware_public_key,
            wallet_address,
            escrow,
        })
    }

    fn persist(&self, record: &AttestationRecord) -> Result<(), AttestationError> {
        let credential = serde_json::to_vec(&record.credential)
            .map_err(|e| AttestationError::Storage(e.to_string()))?;
        self.store.replace(&self.credential_entry, &credential)?;
        if let Err(e) = self
            .store
            .replace(&self.key_id_entry, record.key_id.as_bytes())
        {
            if let Err(rollback) = self.store.delete(&self.credential_entry) {
                warn!(error = %rollback, "failed to roll back access credential");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// The stored record, whether or not its dependent artifacts are present.
    pub fn stored_record(&self) -> Result<Option<AttestationRecord>, AttestationError> {
        let key_id = self.store.get(&self.key_id_entry)?;
        let credential = self.store.get(&self.credential_entry)?;
        let (Some(key_id), Some(credential)) = (key_id, credential) else {
            return Ok(None);
        };

        let key_id = String::from_utf8(key_id.to_vec())
            .map_err(|_| AttestationError::InvalidRecord("key id is not UTF-8".into()))?;
        let credential: AccessCredential = serde_json::from_slice(&credential)
            .map_err(|e| AttestationError::InvalidRecord(e.to_string()))?;
        Ok(Some(AttestationRecord { key_id, credential }))
    }

    /// The stored record if all four dependent artifacts are present.
    pub fn valid_record(&self) -> Result<Option<AttestationRecord>, AttestationError> {
        let Some(record) = self.stored_record()? else {
            return Ok(None);
        };
        let hardware = self.device.public_key()?.is_some();
        let wallet = self.wallet.stored_address()?.is_some();
        let escrowed = self.content.has_key() && self.content.escrow_record()?.is_some();

        if hardware && wallet && escrowed {
            Ok(Some(record))
        } else {
            debug!(hardware, wallet, escrowed, "stored attestation record is missing artifacts");
            Ok(None)
        }
    }

    /// True when a valid access credential is stored.
    pub fn has_stored_access_nft(&self) -> bool {
        matches!(self.valid_record(), Ok(Some(_)))
    }

    /// Delete the key id and the credential. True when both deletions
    /// succeeded or had nothing to delete.
    pub fn remove_key_id(&self) -> bool {
        let mut ok = true;
        for entry in [&self.key_id_entry, &self.credential_entry] {
            if let Err(e) = self.store.delete(entry) {
                warn!(account = %entry.account, error = %e, "failed to delete attestation entry");
                ok = false;
            }
        }
        if ok {
            self.set_state(AttestationState::NoRecord);
        }
        ok
    }
}

fn decode_onboarding_reply(reply: &ApiReply) -> Result<AccessCredential, AttestationError> {
    match reply.status {
        200 => serde_json::from_slice::<AccessNftResponse>(&reply.body)
            .map(AccessCredential::from)
            .map_err(|e| AttestationError::OnboardingFailed(format!("bad credential: {}", e))),
        400 | 401 | 403 | 422 => Err(AttestationError::ValidationFailed {
            status: reply.status,
            reason: ErrorBody::message_from(&reply.body),
        }),
        status => Err(AttestationError::OnboardingFailed(format!(
            "status {}: {}",
            status,
            ErrorBody::message_from(&reply.body)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn artifacts() -> DeviceArtifacts {
        DeviceArtifacts {
            hardware_public_key: "BPUB".into(),
            wallet_address: "0xAbC".into(),
            escrow: EscrowedContentKey {
                ciphertext: "CT".into(),
                data_to_encrypt_hash: "HH".into(),
            },
        }
    }

    #[test]
    fn test_challenge_string_is_sorted() {
        let c = Challenge::from_artifacts(&artifacts());
        assert_eq!(
            c.plain,
            "ethereum_address=0xAbC&lit_ciphertext=CT&lit_hash=HH&secp256r1_pubkey=BPUB"
        );
        assert_eq!(c.hash, sha256(c.plain.as_bytes()));
    }

    #[test]
    fn test_nonce_challenge() {
        let c = Challenge::from_nonce("00ff");
        assert_eq!(c.plain, "00ff");
        assert_eq!(c.hash, sha256(b"00ff"));
    }

    fn reply(status: u16, body: &str) -> ApiReply {
        ApiReply {
            status,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_decode_ok_reply() {
        let cred = decode_onboarding_reply(&reply(
            200,
            r#"{"irys":{"id":"r1","url":"https://x/r1"},"nft":{"hash":"0xh","tokenId":3}}"#,
        ))
        .unwrap();
        assert_eq!(cred.receipt_id, "r1");
        assert_eq!(cred.token_id, "3");
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(
            decode_onboarding_reply(&reply(200, "{}")),
            Err(AttestationError::OnboardingFailed(_))
        ));
        assert!(matches!(
            decode_onboarding_reply(&reply(403, r#"{"error":"challenge mismatch"}"#)),
            Err(AttestationError::ValidationFailed { status: 403, ref reason }) if reason == "challenge mismatch"
        ));
        let err = decode_onboarding_reply(&reply(502, "bad gateway")).unwrap_err();
        assert!(err.is_onboarding_failure());
    }

    #[test]
    fn test_challenge_mode_names() {
        assert_eq!(
            serde_json::to_string(&ChallengeMode::ServerNonce).unwrap(),
            "\"server-nonce\""
        );
    }
}
