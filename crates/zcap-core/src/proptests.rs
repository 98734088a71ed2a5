#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use zcap_crypto::canonical::CanonicalFields;

    use crate::attestation::{Challenge, DeviceArtifacts};
    use crate::content_key::EscrowedContentKey;
    use crate::ledger::{parse_quantity, TokenAmount};
    use crate::payload::{CaptureMetadata, ContentValue, MediaContent};

    fn value() -> impl Strategy<Value = String> {
        "[A-Za-z0-9+/=x]{0,48}"
    }

    proptest! {
        #[test]
        fn test_challenge_independent_of_field_order(
            pubkey in value(),
            address in value(),
            ciphertext in value(),
            hash in value(),
            rotate in 0usize..4,
        ) {
            let artifacts = DeviceArtifacts {
                hardware_public_key: pubkey.clone(),
                wallet_address: address.clone(),
                escrow: EscrowedContentKey {
                    ciphertext: ciphertext.clone(),
                    data_to_encrypt_hash: hash.clone(),
                },
            };
            let mut pairs = vec![
                ("secp256r1_pubkey", pubkey),
                ("ethereum_address", address),
                ("lit_ciphertext", ciphertext),
                ("lit_hash", hash),
            ];
            pairs.rotate_left(rotate);
            let shuffled: CanonicalFields = pairs.into_iter().collect();

            let challenge = Challenge::from_artifacts(&artifacts);
            prop_assert_eq!(challenge.plain, shuffled.to_canonical_string());
            prop_assert_eq!(challenge.hash, shuffled.digest());
        }

        #[test]
        fn test_public_digest_tracks_timestamp(
            media in "[A-Za-z0-9+/]{0,64}",
            t1 in any::<i64>(),
            t2 in any::<i64>(),
        ) {
            prop_assume!(t1 != t2);
            let at = |timestamp| ContentValue::Public(MediaContent {
                mediadata: media.clone(),
                metadata: CaptureMetadata { timestamp },
            });
            prop_assert_ne!(at(t1).hash_input(), at(t2).hash_input());
        }

        #[test]
        fn test_parse_quantity_accepts_padded_words(n in any::<u128>()) {
            prop_assert_eq!(parse_quantity(&format!("0x{:x}", n)).unwrap(), n);
            prop_assert_eq!(parse_quantity(&format!("0x{:064x}", n)).unwrap(), n);
        }

        #[test]
        fn test_amount_display_is_exact(raw in any::<u128>(), decimals in 0u8..=30) {
            let shown = TokenAmount::new(raw, decimals).to_string();
            let (int_part, frac_part) = shown.split_once('.').unwrap_or((shown.as_str(), ""));
            prop_assert!(!frac_part.ends_with('0'));
            prop_assert!(frac_part.len() <= usize::from(decimals));

            let scale = usize::from(decimals);
            let digits = format!("{}{}", int_part, format!("{:0<width$}", frac_part, width = scale));
            prop_assert_eq!(digits.parse::<u128>().unwrap(), raw);
        }
    }
}
