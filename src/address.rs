//! Deterministic account addressing.
//!
//! Wallet and guardian accounts live at program-derived addresses: a SHA-256
//! over the seeds, a one-byte bump, the owning program id and a fixed marker,
//! accepted only when the digest is *not* a valid ed25519 point. Derivation is
//! delegated to `solana-pubkey`, the same code the ledger program links, so
//! every client lands on the same bytes. Nothing here may depend on
//! configuration or platform.

use serde::{Deserialize, Deserializer, Serializer};
pub use solana_pubkey::{MAX_SEED_LEN, MAX_SEEDS, Pubkey};

use crate::error::{WalletError, WalletResult};

/// Domain tag for wallet addresses.
pub const WALLET_SEED: &[u8] = b"multisig";
/// Domain tag for guardian addresses.
pub const GUARDIAN_SEED: &[u8] = b"guardian";
/// Size of the credential-derived seed. With the 8-byte domain tag this fills
/// the ledger's 32-byte seed allowance.
pub const SEED_LEN: usize = 24;

/// Parse a base58 address, ignoring surrounding whitespace.
pub fn parse_pubkey(raw: &str) -> WalletResult<Pubkey> {
    raw.trim()
        .parse()
        .map_err(|e| WalletError::Validation(format!("Invalid base58 address {raw:?}: {e}")))
}

pub fn pubkey_from_slice(bytes: &[u8]) -> WalletResult<Pubkey> {
    Pubkey::try_from(bytes).map_err(|_| {
        WalletError::Validation(format!("Address must be 32 bytes, got {}", bytes.len()))
    })
}

/// Serde adapter keeping addresses as base58 strings in JSON and in the
/// staging store, e.g. `#[serde(with = "crate::address::base58")]`.
pub mod base58 {
    use super::*;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_pubkey(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(key: &Option<Pubkey>, serializer: S) -> Result<S::Ok, S::Error> {
            match key {
                Some(key) => serializer.collect_str(key),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Pubkey>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| parse_pubkey(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Well-known ledger program and sysvar ids.
pub mod ids {
    use super::Pubkey;

    /// `11111111111111111111111111111111`
    pub const SYSTEM_PROGRAM: Pubkey = Pubkey::new_from_array([0; 32]);

    /// `Sysvar1nstructions1111111111111111111111111`
    pub const INSTRUCTIONS_SYSVAR: Pubkey = Pubkey::new_from_array([
        6, 167, 213, 23, 24, 123, 209, 102, 53, 218, 212, 4, 85, 253, 194, 192, 193, 36, 198,
        143, 33, 86, 117, 165, 219, 186, 203, 95, 8, 0, 0, 0,
    ]);

    /// `Secp256r1SigVerify1111111111111111111111111`
    pub const SECP256R1_PROGRAM: Pubkey = Pubkey::new_from_array([
        6, 146, 13, 236, 47, 234, 113, 181, 183, 35, 129, 77, 116, 45, 169, 3, 28, 131, 231, 95,
        219, 121, 93, 86, 142, 117, 71, 128, 32, 0, 0, 0,
    ]);
}

fn check_seeds(seeds: &[&[u8]]) -> WalletResult<()> {
    if seeds.len() > MAX_SEEDS {
        return Err(WalletError::Validation(format!(
            "At most {MAX_SEEDS} seeds allowed, got {}",
            seeds.len()
        )));
    }
    if let Some(seed) = seeds.iter().find(|seed| seed.len() > MAX_SEED_LEN) {
        return Err(WalletError::Validation(format!(
            "Seed of {} bytes exceeds {MAX_SEED_LEN}",
            seed.len()
        )));
    }
    Ok(())
}

/// Hash `seeds` into a program address, failing if the result is on curve.
pub fn create_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> WalletResult<Pubkey> {
    check_seeds(seeds)?;
    Pubkey::create_program_address(seeds, program_id)
        .map_err(|e| WalletError::Validation(format!("Cannot derive program address: {e}")))
}

/// Search bumps from 255 down to 0 and return the first off-curve address.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> WalletResult<(Pubkey, u8)> {
    check_seeds(seeds)?;
    if seeds.len() >= MAX_SEEDS {
        return Err(WalletError::Validation(format!(
            "At most {} seeds allowed before the bump",
            MAX_SEEDS - 1
        )));
    }

    Pubkey::try_find_program_address(seeds, program_id).ok_or_else(|| {
        WalletError::AddressDerivationExhausted {
            program_id: program_id.to_string(),
        }
    })
}

/// Fit a credential id into a 24-byte seed.
///
/// Short ids are right-padded with zeros. Longer ids are XOR-folded, which is
/// not collision resistant; two long ids can share a wallet address.
pub fn seed_from_credential(credential_id: &[u8]) -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    if credential_id.len() <= SEED_LEN {
        seed[..credential_id.len()].copy_from_slice(credential_id);
    } else {
        for (i, byte) in credential_id.iter().enumerate() {
            seed[i % SEED_LEN] ^= byte;
        }
    }
    seed
}

/// Wallet address for a credential: seeds `["multisig", seed_from_credential(id)]`.
pub fn wallet_address(program_id: &Pubkey, credential_id: &[u8]) -> WalletResult<(Pubkey, u8)> {
    let seed = seed_from_credential(credential_id);
    find_program_address(&[WALLET_SEED, &seed], program_id)
}

/// Wallet address from an already folded seed.
pub fn wallet_address_from_seed(
    program_id: &Pubkey,
    seed: &[u8; SEED_LEN],
) -> WalletResult<(Pubkey, u8)> {
    find_program_address(&[WALLET_SEED, seed], program_id)
}

/// Guardian address: seeds `["guardian", wallet, guardian_id as u64 LE]`.
pub fn guardian_address(
    program_id: &Pubkey,
    wallet: &Pubkey,
    guardian_id: u64,
) -> WalletResult<(Pubkey, u8)> {
    let id_bytes = guardian_id.to_le_bytes();
    find_program_address(&[GUARDIAN_SEED, wallet.as_ref(), &id_bytes], program_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Pubkey {
        Pubkey::new_from_array([7; 32])
    }

    #[test]
    fn test_short_credential_is_zero_padded() {
        let seed = seed_from_credential(b"abc123");
        assert_eq!(seed.len(), SEED_LEN);
        assert_eq!(&seed[..6], b"abc123");
        assert!(seed[6..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_exact_length_credential_is_copied() {
        let id = [0xAB; SEED_LEN];
        assert_eq!(seed_from_credential(&id), id);
    }

    #[test]
    fn test_long_credential_is_folded() {
        let mut id = vec![0u8; 48];
        id[0] = 0x0F;
        id[24] = 0xF0;
        id[47] = 0x01;

        let seed = seed_from_credential(&id);
        assert_eq!(seed[0], 0xFF);
        assert_eq!(seed[23], 0x01);
        assert_eq!(seed_from_credential(&id), seed);
    }

    #[test]
    fn test_fold_collision_is_possible() {
        // Documented limitation: swapping bytes 24 positions apart collides.
        let mut a = vec![0u8; 48];
        let mut b = vec![0u8; 48];
        a[0] = 1;
        b[24] = 1;
        assert_eq!(seed_from_credential(&a), seed_from_credential(&b));
    }

    #[test]
    fn test_wallet_address_is_deterministic_and_off_curve() {
        let (first, bump) = wallet_address(&program(), b"credential-1").unwrap();
        let (second, bump_again) = wallet_address(&program(), b"credential-1").unwrap();
        assert_eq!(first, second);
        assert_eq!(bump, bump_again);
        assert!(!first.is_on_curve());

        let (other, _) = wallet_address(&program(), b"credential-2").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_bump_reproduces_address() {
        let seed = seed_from_credential(b"credential-1");
        let (address, bump) = wallet_address_from_seed(&program(), &seed).unwrap();
        let recreated = create_program_address(&[WALLET_SEED, &seed, &[bump]], &program()).unwrap();
        assert_eq!(address, recreated);
    }

    #[test]
    fn test_guardian_address_depends_on_wallet() {
        let (wallet_a, _) = wallet_address(&program(), b"a").unwrap();
        let (wallet_b, _) = wallet_address(&program(), b"b").unwrap();
        assert_ne!(
            guardian_address(&program(), &wallet_a, 1).unwrap().0,
            guardian_address(&program(), &wallet_b, 1).unwrap().0
        );
    }

    #[test]
    fn test_oversized_seed_rejected() {
        let long = [0u8; 33];
        assert!(matches!(
            find_program_address(&[&long], &program()),
            Err(WalletError::Validation(_))
        ));
    }

    #[test]
    fn test_well_known_ids_render() {
        assert_eq!(
            ids::SYSTEM_PROGRAM.to_string(),
            "11111111111111111111111111111111"
        );
        assert_eq!(
            ids::INSTRUCTIONS_SYSVAR.to_string(),
            "Sysvar1nstructions1111111111111111111111111"
        );
        assert_eq!(
            ids::SECP256R1_PROGRAM.to_string(),
            "Secp256r1SigVerify1111111111111111111111111"
        );
    }

    #[test]
    fn test_parse_pubkey() {
        let key = Pubkey::new_from_array([42; 32]);
        assert_eq!(parse_pubkey(&format!("  {key}\n")).unwrap(), key);
        assert!(matches!(
            parse_pubkey("not-base58!"),
            Err(WalletError::Validation(_))
        ));
        assert!(pubkey_from_slice(&[1; 31]).is_err());
        assert_eq!(pubkey_from_slice(&[42; 32]).unwrap(), key);
    }

    #[test]
    fn test_base58_serde_adapter() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Record {
            #[serde(with = "base58")]
            wallet: Pubkey,
            #[serde(default, skip_serializing_if = "Option::is_none", with = "base58::option")]
            filter: Option<Pubkey>,
        }

        let key = Pubkey::new_from_array([42; 32]);
        let record = Record { wallet: key, filter: None };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, format!("{{\"wallet\":\"{key}\"}}"));
        assert_eq!(serde_json::from_str::<Record>(&json).unwrap(), record);

        let filtered: Record =
            serde_json::from_str(&format!("{{\"wallet\":\"{key}\",\"filter\":\"{key}\"}}")).unwrap();
        assert_eq!(filtered.filter, Some(key));
        assert!(serde_json::from_str::<Record>(r#"{"wallet":"0OIl"}"#).is_err());
    }

    #[test]
    fn test_bump_search_matches_ledger_derivation() {
        let seed = seed_from_credential(b"credential-1");
        let (address, bump) = wallet_address_from_seed(&program(), &seed).unwrap();
        assert_eq!(
            Pubkey::find_program_address(&[WALLET_SEED, &seed], &program()),
            (address, bump)
        );
    }

    mod proptest_derivation {
        use proptest::prelude::*;

        use super::*;

        fn arb_credential_id() -> impl Strategy<Value = Vec<u8>> {
            prop::collection::vec(any::<u8>(), 0..=128)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn guardian_address_injective_over_ids(
                credential_id in arb_credential_id(),
                first_id in 1..=u64::MAX,
                second_id in 1..=u64::MAX,
            ) {
                prop_assume!(first_id != second_id);
                let (wallet, _) = wallet_address(&program(), &credential_id).unwrap();

                let (first, _) = guardian_address(&program(), &wallet, first_id).unwrap();
                let (second, _) = guardian_address(&program(), &wallet, second_id).unwrap();
                prop_assert_ne!(first, second);
                prop_assert!(!first.is_on_curve());
                prop_assert!(!second.is_on_curve());
            }

            #[test]
            fn guardian_address_separates_wallets(
                first_credential in arb_credential_id(),
                second_credential in arb_credential_id(),
                guardian_id in 1..=u64::MAX,
            ) {
                prop_assume!(
                    seed_from_credential(&first_credential) != seed_from_credential(&second_credential)
                );
                let (first_wallet, _) = wallet_address(&program(), &first_credential).unwrap();
                let (second_wallet, _) = wallet_address(&program(), &second_credential).unwrap();
                prop_assert_ne!(first_wallet, second_wallet);
                prop_assert!(!first_wallet.is_on_curve());

                prop_assert_ne!(
                    guardian_address(&program(), &first_wallet, guardian_id).unwrap().0,
                    guardian_address(&program(), &second_wallet, guardian_id).unwrap().0
                );
            }
        }
    }
}
