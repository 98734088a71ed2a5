//! Error types for the capture core.
//!
//! Each component has its own error enum; [`CoreError`] unifies them for
//! callers that drive several components (the setup machine, the CLI) and
//! classifies failures as retryable or terminal.

use std::time::Duration;

use thiserror::Error;

use zcap_crypto::content_key::ContentKeyError;
use zcap_crypto::device::DeviceKeyError;
use zcap_crypto::wallet::WalletCryptoError;

pub use crate::store::StoreError;

// ============================================================================
// Key manager errors
// ============================================================================

/// Errors raised by the device, wallet and content key managers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("key storage failed: {0}")]
    KeyStorageFailed(String),

    #[error("key retrieval failed: {0}")]
    KeyRetrievalFailed(String),

    #[error("no key found")]
    NoKeyFound,

    #[error("no wallet found")]
    NoWalletFound,

    #[error("invalid key data: {0}")]
    InvalidKeyData(String),

    #[error("signing algorithm not supported by this hardware")]
    SigningUnsupported,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("invalid encrypted data")]
    InvalidEncryptedData,

    #[error("secure hardware unavailable")]
    SecureHardwareUnavailable,

    #[error("escrow failed: {0}")]
    Escrow(#[from] EscrowError),

    #[error("ledger query failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<StoreError> for KeyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DataCorruption(msg) => KeyError::InvalidKeyData(msg),
            StoreError::Serialization(msg) => KeyError::InvalidKeyData(msg),
            other => KeyError::KeyRetrievalFailed(other.to_string()),
        }
    }
}

impl From<ContentKeyError> for KeyError {
    fn from(e: ContentKeyError) -> Self {
        match e {
            ContentKeyError::InvalidKeyData { .. } => KeyError::InvalidKeyData(e.to_string()),
            ContentKeyError::InvalidEncryptedData => KeyError::InvalidEncryptedData,
            ContentKeyError::EncryptFailed => KeyError::SigningFailed(e.to_string()),
            ContentKeyError::Rng => KeyError::KeyGenerationFailed(e.to_string()),
        }
    }
}

impl From<WalletCryptoError> for KeyError {
    fn from(e: WalletCryptoError) -> Self {
        match e {
            WalletCryptoError::InvalidPrivateKey => KeyError::InvalidKeyData(e.to_string()),
            WalletCryptoError::SigningFailed => KeyError::SigningFailed(e.to_string()),
            other => KeyError::SigningFailed(other.to_string()),
        }
    }
}

impl From<DeviceKeyError> for KeyError {
    fn from(e: DeviceKeyError) -> Self {
        match e {
            DeviceKeyError::InvalidPrivateKey | DeviceKeyError::InvalidPublicKey => {
                KeyError::InvalidKeyData(e.to_string())
            }
            other => KeyError::SigningFailed(other.to_string()),
        }
    }
}

// ============================================================================
// Remote collaborator errors
// ============================================================================

/// Threshold-encryption network failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("escrow session could not be established: {0}")]
    SessionFailed(String),

    #[error("escrow session timed out after {0:?}")]
    Timeout(Duration),

    #[error("escrow encryption failed: {0}")]
    EncryptFailed(String),

    #[error("invalid escrow response: {0}")]
    InvalidResponse(String),
}

/// Ledger RPC failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),

    #[error("value does not fit in 128 bits: {0}")]
    Overflow(String),
}

/// Remote provenance API failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

// ============================================================================
// Orchestration errors
// ============================================================================

/// Device attestation and registration failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("attestation key generation failed: {0}")]
    KeyGenFailed(String),

    #[error("attestation failed: {0}")]
    AttestationFailed(String),

    #[error("could not obtain attestation challenge: {0}")]
    NonceOrChallengeRetrievalFailed(String),

    #[error("attestation rejected by verifier (status {status}): {reason}")]
    ValidationFailed { status: u16, reason: String },

    #[error("onboarding failed: {0}")]
    OnboardingFailed(String),

    #[error("attestation unsupported on this device")]
    Unsupported,

    #[error("missing prerequisite artifact: {0}")]
    MissingArtifact(&'static str),

    #[error("stored attestation record is invalid: {0}")]
    InvalidRecord(String),

    #[error("attestation record storage failed: {0}")]
    Storage(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

impl AttestationError {
    /// True for failures of the registration round-trip, including explicit
    /// verifier rejections.
    pub fn is_onboarding_failure(&self) -> bool {
        matches!(
            self,
            AttestationError::OnboardingFailed(_) | AttestationError::ValidationFailed { .. }
        )
    }
}

impl From<StoreError> for AttestationError {
    fn from(e: StoreError) -> Self {
        AttestationError::Storage(e.to_string())
    }
}

/// Per-capture signing failures. A failed capture never emits a partial payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("missing identity: {0}")]
    MissingIdentity(&'static str),

    #[error("content encryption failed: {0}")]
    Encryption(KeyError),

    #[error("wallet signature failed: {0}")]
    WalletSignature(KeyError),

    #[error("hardware signature failed: {0}")]
    HardwareSignature(KeyError),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("payload verification failed: {0}")]
    Verification(String),

    #[error("publish failed: {0}")]
    Publish(#[from] ApiError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

// ============================================================================
// Unified error
// ============================================================================

/// Any failure the core can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl CoreError {
    /// Network failures and timeouts; the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Escrow(_) | CoreError::Ledger(_) | CoreError::Api(_) => true,
            CoreError::Key(k) => key_error_retryable(k),
            CoreError::Attestation(a) => match a {
                AttestationError::NonceOrChallengeRetrievalFailed(_)
                | AttestationError::OnboardingFailed(_)
                | AttestationError::AttestationFailed(_) => true,
                AttestationError::Key(k) => key_error_retryable(k),
                _ => false,
            },
            CoreError::Capture(c) => match c {
                CaptureError::Publish(_) => true,
                CaptureError::WalletSignature(k) | CaptureError::HardwareSignature(k) => {
                    key_error_retryable(k)
                }
                _ => false,
            },
            CoreError::Store(StoreError::OperationFailed(_)) => true,
            CoreError::Store(_) => false,
        }
    }

    /// An escrow session that did not start in time, however deeply it
    /// was wrapped on the way up.
    pub fn is_timeout(&self) -> bool {
        match self {
            CoreError::Escrow(EscrowError::Timeout(_)) => true,
            CoreError::Key(k)
            | CoreError::Attestation(AttestationError::Key(k))
            | CoreError::Capture(CaptureError::Key(k)) => {
                matches!(k, KeyError::Escrow(EscrowError::Timeout(_)))
            }
            _ => false,
        }
    }

    /// Permanent conditions for this device; retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        let key = match self {
            CoreError::Key(k) => Some(k),
            CoreError::Attestation(AttestationError::Key(k)) => Some(k),
            CoreError::Capture(CaptureError::HardwareSignature(k)) => Some(k),
            CoreError::Attestation(AttestationError::Unsupported) => return true,
            _ => None,
        };
        matches!(
            key,
            Some(KeyError::SecureHardwareUnavailable) | Some(KeyError::SigningUnsupported)
        )
    }
}

fn key_error_retryable(e: &KeyError) -> bool {
    matches!(
        e,
        KeyError::Escrow(_) | KeyError::Ledger(_) | KeyError::KeyGenerationFailed(_)
    )
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_retryable() {
        assert!(CoreError::from(EscrowError::Timeout(Duration::from_secs(10))).is_retryable());
        assert!(CoreError::from(ApiError::Http("reset".into())).is_retryable());
        assert!(CoreError::from(KeyError::Ledger(LedgerError::Transport("x".into()))).is_retryable());
    }

    #[test]
    fn test_nested_escrow_timeout_is_a_timeout() {
        let timeout = EscrowError::Timeout(Duration::from_secs(10));
        assert!(CoreError::from(timeout.clone()).is_timeout());
        let nested = CoreError::from(AttestationError::Key(KeyError::Escrow(timeout)));
        assert!(nested.is_timeout());
        assert!(nested.is_retryable());
        assert!(!CoreError::from(EscrowError::SessionFailed("refused".into())).is_timeout());
    }

    #[test]
    fn test_missing_hardware_is_terminal() {
        let err = CoreError::from(KeyError::SecureHardwareUnavailable);
        assert!(err.is_terminal());
        assert!(!err.is_retryable());

        let err = CoreError::from(CaptureError::HardwareSignature(KeyError::SigningUnsupported));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_corrupt_data_is_neither() {
        let err = CoreError::from(KeyError::InvalidKeyData("truncated".into()));
        assert!(!err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_store_corruption_maps_to_invalid_key_data() {
        let err: KeyError = StoreError::DataCorruption("bad tag".into()).into();
        assert!(matches!(err, KeyError::InvalidKeyData(_)));
    }

    #[test]
    fn test_content_key_error_mapping() {
        let err: KeyError = ContentKeyError::InvalidEncryptedData.into();
        assert_eq!(err, KeyError::InvalidEncryptedData);
        let err: KeyError = ContentKeyError::InvalidKeyData { expected: 44, got: 3 }.into();
        assert!(matches!(err, KeyError::InvalidKeyData(_)));
    }

    #[test]
    fn test_validation_counts_as_onboarding_failure() {
        let err = AttestationError::ValidationFailed {
            status: 403,
            reason: "bad receipt".into(),
        };
        assert!(err.is_onboarding_failure());
        assert!(AttestationError::OnboardingFailed("500".into()).is_onboarding_failure());
        assert!(!AttestationError::KeyGenFailed("x".into()).is_onboarding_failure());
    }
}
