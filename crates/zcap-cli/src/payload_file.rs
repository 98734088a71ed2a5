//! Reading media and reading/writing payload files.

use std::path::Path;

use anyhow::Context;
use zcap_core::payload::CapturePayload;

/// Media files larger than this are refused.
pub const MAX_MEDIA_BYTES: u64 = 64 * 1024 * 1024;

pub async fn read_media(path: &Path) -> anyhow::Result<Vec<u8>> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("{} is not a file", path.display());
    }
    if meta.len() > MAX_MEDIA_BYTES {
        anyhow::bail!(
            "{} is {} bytes; the limit is {} bytes",
            path.display(),
            meta.len(),
            MAX_MEDIA_BYTES
        );
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))
}

pub async fn read_payload(path: &Path) -> anyhow::Result<CapturePayload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("{} is not a capture payload", path.display()))
}

pub async fn write_payload(path: &Path, payload: &CapturePayload) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(payload)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("cannot write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcap_core::payload::{ContentValue, PrivateContent, SignatureBlock};

    fn payload() -> CapturePayload {
        CapturePayload {
            content: ContentValue::Private(PrivateContent {
                encrypted: "AAAA".into(),
            }),
            sha256: "00".repeat(32),
            eth: SignatureBlock {
                pubkey: "0xabc".into(),
                signature: "0x00".into(),
            },
            secp256r1: SignatureBlock {
                pubkey: "BA==".into(),
                signature: "MA==".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_payload_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.json");
        write_payload(&path, &payload()).await.unwrap();
        assert_eq!(read_payload(&path).await.unwrap(), payload());
    }

    #[tokio::test]
    async fn test_rejects_non_payload_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.json");
        tokio::fs::write(&path, br#"{"hello":"world"}"#).await.unwrap();
        assert!(read_payload(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_read_media_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_media(dir.path()).await.is_err());
        let file = dir.path().join("m.jpg");
        tokio::fs::write(&file, b"jpeg").await.unwrap();
        assert_eq!(read_media(&file).await.unwrap(), b"jpeg");
    }
}
