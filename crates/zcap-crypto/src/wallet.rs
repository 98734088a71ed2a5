//! secp256k1 wallet keys with Ethereum-style addresses and EIP-191
//! (`personal_sign`) message signatures.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::hash::keccak256;
use crate::utils::{decode_hex_0x, hex_0x};

pub const PRIVATE_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WalletCryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("signing failed")]
    SigningFailed,
}

/// A wallet keypair. The private scalar is zeroized on drop by `SigningKey`.
#[derive(Clone)]
pub struct WalletKey {
    signing: SigningKey,
}

impl std::fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKey")
            .field("address", &self.address())
            .finish()
    }
}

impl WalletKey {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletCryptoError> {
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(WalletCryptoError::InvalidPrivateKey);
        }
        let signing =
            SigningKey::from_slice(bytes).map_err(|_| WalletCryptoError::InvalidPrivateKey)?;
        Ok(Self { signing })
    }

    pub fn private_key_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LEN]> {
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        out.copy_from_slice(&self.signing.to_bytes());
        out
    }

    /// Uncompressed SEC1 public key (65 bytes, leading 0x04).
    pub fn public_key_uncompressed(&self) -> Vec<u8> {
        self.signing
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// EIP-55 checksummed address.
    pub fn address(&self) -> String {
        address_from_verifying_key(self.signing.verifying_key())
    }

    /// EIP-191 signature over the UTF-8 bytes of `message`: `r || s || v`, v in {27, 28}.
    pub fn sign_personal_message(
        &self,
        message: &[u8],
    ) -> Result<[u8; SIGNATURE_LEN], WalletCryptoError> {
        let digest = personal_message_hash(message);
        let (sig, recid) = self
            .signing
            .sign_prehash_recoverable(&digest)
            .map_err(|_| WalletCryptoError::SigningFailed)?;

        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = 27 + recid.to_byte();
        Ok(out)
    }

    /// Hex (`0x`-prefixed) form of [`sign_personal_message`](Self::sign_personal_message).
    pub fn sign_personal_message_hex(&self, message: &[u8]) -> Result<String, WalletCryptoError> {
        Ok(hex_0x(&self.sign_personal_message(message)?))
    }
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)`
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data)
}

fn address_from_verifying_key(vk: &VerifyingKey) -> String {
    let point = vk.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    to_checksum_address(&hash[12..])
}

/// EIP-55 mixed-case encoding of a 20-byte address.
pub fn to_checksum_address(addr: &[u8]) -> String {
    let lower = hex::encode(addr);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse and re-checksum a `0x` address, rejecting anything that is not 20 bytes.
pub fn normalize_address(address: &str) -> Result<String, WalletCryptoError> {
    let trimmed = address.trim();
    if !(trimmed.starts_with("0x") || trimmed.starts_with("0X")) {
        return Err(WalletCryptoError::InvalidAddress("missing 0x prefix".into()));
    }
    let bytes =
        decode_hex_0x(trimmed).map_err(|e| WalletCryptoError::InvalidAddress(e.to_string()))?;
    if bytes.len() != 20 {
        return Err(WalletCryptoError::InvalidAddress(format!(
            "expected 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(to_checksum_address(&bytes))
}

/// Recover the checksummed signer address of an EIP-191 signature.
pub fn recover_personal_signer(
    message: &[u8],
    signature: &[u8],
) -> Result<String, WalletCryptoError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(WalletCryptoError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        )));
    }
    let v = signature[64];
    let recid = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| WalletCryptoError::InvalidSignature(format!("bad recovery id {}", v)))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| WalletCryptoError::InvalidSignature(e.to_string()))?;

    let digest = personal_message_hash(message);
    let vk = VerifyingKey::recover_from_prehash(&digest, &sig, recid)
        .map_err(|e| WalletCryptoError::InvalidSignature(e.to_string()))?;
    Ok(address_from_verifying_key(&vk))
}

/// True when `signature_hex` is a valid EIP-191 signature of `message` by `address`.
pub fn verify_personal_signature(message: &[u8], signature_hex: &str, address: &str) -> bool {
    let Ok(sig) = decode_hex_0x(signature_hex) else {
        return false;
    };
    match (recover_personal_signer(message, &sig), normalize_address(address)) {
        (Ok(recovered), Ok(expected)) => recovered == expected,
        _ => false,
    }
}
