#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::canonical::CanonicalFields;
    use crate::content_key::{ContentKeyError, ContentKeyRecord, COMBINED_LEN};
    use crate::wallet::{recover_personal_signer, WalletKey};

    proptest! {
        #[test]
        fn test_combined_round_trip(key in any::<[u8; 32]>(), nonce in any::<[u8; 12]>()) {
            let rec = ContentKeyRecord::from_parts(key, nonce);
            let decoded = ContentKeyRecord::from_combined(&rec.to_combined()).unwrap();
            prop_assert_eq!(decoded, rec);
        }

        #[test]
        fn test_decode_rejects_non_44(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            prop_assume!(bytes.len() != COMBINED_LEN);
            let is_invalid_len = matches!(
                ContentKeyRecord::from_combined(&bytes),
                Err(ContentKeyError::InvalidKeyData { .. })
            );
            prop_assert!(is_invalid_len);
        }

        #[test]
        fn test_seal_open_round_trip(
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; 12]>(),
            plaintext in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let rec = ContentKeyRecord::from_parts(key, nonce);
            let sealed = rec.seal(&plaintext).unwrap();
            prop_assert_eq!(rec.open(&sealed).unwrap(), plaintext);
        }

        #[test]
        fn test_single_byte_tamper_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            idx in any::<usize>(),
            flip in 1u8..=255
        ) {
            let rec = ContentKeyRecord::generate().unwrap();
            let mut sealed = rec.seal(&plaintext).unwrap();
            let i = idx % sealed.len();
            sealed[i] ^= flip;
            prop_assert_eq!(rec.open(&sealed), Err(ContentKeyError::InvalidEncryptedData));
        }

        #[test]
        fn test_canonical_order_independent(
            entries in proptest::collection::btree_map("[a-z_.]{1,12}", "[A-Za-z0-9+/=]{0,24}", 1..8),
            seed in any::<u64>()
        ) {
            let forward: Vec<(String, String)> = entries.clone().into_iter().collect();
            let mut shuffled = forward.clone();
            // Deterministic rotation stands in for an arbitrary insertion order.
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let a: CanonicalFields = forward.into_iter().collect();
            let b: CanonicalFields = shuffled.into_iter().collect();
            prop_assert_eq!(a.to_canonical_string(), b.to_canonical_string());
            prop_assert_eq!(a.digest(), b.digest());
        }

        #[test]
        fn test_wallet_signature_recovers_signer(message in proptest::collection::vec(any::<u8>(), 0..128)) {
            let key = WalletKey::generate();
            let sig = key.sign_personal_message(&message).unwrap();
            prop_assert_eq!(recover_personal_signer(&message, &sig).unwrap(), key.address());
        }
    }
}
