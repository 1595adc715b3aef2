//! Credential vault: password padding, slow key derivation and AES
//! protection of the wallet password and backup key.
//!
//! Two slow keys exist per wallet. K1 is derived from the wallet's original
//! secret (seed or entropy bytes, or the device password for hardware
//! wallets) and encrypts the padded user password; its raw bytes double as
//! the backup subsystem's key. K2 is derived from the password itself and
//! encrypts K1. Backup/restore flows can therefore recover the password
//! from the original secret alone, while the backup key is recoverable only
//! with the password. Rotation re-encrypts both fields under a fresh IV
//! without needing the original secret.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::VaultError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block length in bytes.
pub const AES_BLOCK_LENGTH: usize = 16;

/// AES-256 key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// Initialization vector length in bytes.
pub const AES_IV_LENGTH: usize = 16;

/// Salt for deriving AES keys from credentials and wallet secrets.
/// Fixed application-wide; changing it orphans every existing record.
pub(crate) const SCRYPT_SALT: [u8; 8] = [0x35, 0x51, 0x03, 0x80, 0x75, 0xa3, 0xb0, 0xc5];

/// The initialization vector hard-coded by pre-migration wallets.
/// Still accepted on read so legacy records keep decrypting.
/// There is no particular significance to the value of these bytes.
pub(crate) const LEGACY_FIXED_IV: [u8; AES_IV_LENGTH] = [
    0xa3, 0x44, 0x39, 0x1f, 0x53, 0x83, 0x11, 0xb3, 0x29, 0x54, 0x86, 0x16, 0xc4, 0x89, 0x72,
    0x3e,
];

// Scrypt parameters (N = 2^14)
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// The encrypted credential material stored in the wallet summary.
///
/// Holds no plaintext. The backup key bytes underneath
/// `encrypted_backup_key` never change for the life of a wallet
/// identifier; only their encryption (key and IV) is rotated when the
/// user changes their password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// AES ciphertext of the padded user password under K1.
    #[serde(with = "serde_hex")]
    pub encrypted_password: Vec<u8>,

    /// AES ciphertext of K1's raw key bytes under K2.
    #[serde(with = "serde_hex")]
    pub encrypted_backup_key: Vec<u8>,

    /// IV used for the most recent encryption of both fields. Sidecars
    /// written before the random-IV migration carry no IV field and
    /// default to the hard-coded legacy value.
    #[serde(default = "legacy_iv", with = "serde_hex_iv")]
    pub iv: [u8; AES_IV_LENGTH],
}

fn legacy_iv() -> [u8; AES_IV_LENGTH] {
    LEGACY_FIXED_IV
}

/// Pad password bytes with random filler so that the length of the
/// encrypted credentials does not leak the existence of a short password.
///
/// Byte 0 is the number of filler bytes (0x00, 0x10, 0x20 or 0x30 by
/// password length tier), followed by that many random bytes, followed by
/// the password itself. All passwords up to three AES blocks long land in
/// one of four ciphertext-length buckets.
pub fn pad_password(password: &[u8]) -> Vec<u8> {
    let filler_len = if password.len() > AES_BLOCK_LENGTH * 3 {
        0
    } else if password.len() > AES_BLOCK_LENGTH * 2 {
        16
    } else if password.len() > AES_BLOCK_LENGTH {
        32
    } else {
        48
    };

    let mut padded = Vec::with_capacity(1 + filler_len + password.len());
    padded.push(filler_len as u8);
    let mut filler = vec![0u8; filler_len];
    rand::thread_rng().fill_bytes(&mut filler);
    padded.extend_from_slice(&filler);
    padded.extend_from_slice(password);
    padded
}

/// Strip the padding marker and filler bytes, returning the password.
///
/// A marker byte exceeding the available length means the stored record is
/// corrupt; this fails with [`VaultError::MalformedCredentialRecord`] and
/// is never repaired.
pub fn unpad_password(padded: &[u8]) -> Result<Vec<u8>, VaultError> {
    let Some((&marker, rest)) = padded.split_first() else {
        return Err(VaultError::MalformedCredentialRecord);
    };
    let filler_len = marker as usize;
    if filler_len > rest.len() {
        return Err(VaultError::MalformedCredentialRecord);
    }
    Ok(rest[filler_len..].to_vec())
}

/// Derive a 256-bit AES key from a secret via scrypt with the fixed salt.
pub fn derive_key(secret: &[u8]) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, VaultError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, AES_KEY_LENGTH)
        .map_err(|e| VaultError::CryptoUnavailable(e.to_string()))?;
    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    scrypt::scrypt(secret, &SCRYPT_SALT, &params, key.as_mut_slice())
        .map_err(|e| VaultError::CryptoUnavailable(e.to_string()))?;
    Ok(key)
}

/// Generate a random 16-byte initialization vector.
pub fn generate_iv() -> [u8; AES_IV_LENGTH] {
    let mut iv = [0u8; AES_IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// AES-256-CBC/PKCS7 encryption.
pub(crate) fn aes_encrypt(
    plain: &[u8],
    key: &[u8; AES_KEY_LENGTH],
    iv: &[u8; AES_IV_LENGTH],
) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain)
}

/// AES-256-CBC/PKCS7 decryption.
pub(crate) fn aes_decrypt(
    cipher: &[u8],
    key: &[u8; AES_KEY_LENGTH],
    iv: &[u8; AES_IV_LENGTH],
) -> Result<Vec<u8>, VaultError> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(cipher)
        .map_err(|_| VaultError::IncorrectCredential)
}

/// Initial-write path: protect the password and backup key under layered
/// encryption.
///
/// K1 = scrypt(secret) encrypts the padded password; K2 = scrypt(password)
/// encrypts K1's raw bytes. Both use one freshly generated random IV.
pub fn protect_credentials(secret: &[u8], password: &[u8]) -> Result<CredentialRecord, VaultError> {
    let secret_key = derive_key(secret)?;
    let password_key = derive_key(password)?;
    let iv = generate_iv();

    let padded = Zeroizing::new(pad_password(password));
    let encrypted_password = aes_encrypt(&padded, &secret_key, &iv);
    let encrypted_backup_key = aes_encrypt(secret_key.as_slice(), &password_key, &iv);

    Ok(CredentialRecord {
        encrypted_password,
        encrypted_backup_key,
        iv,
    })
}

/// Recover the backup key (K1's raw bytes) using the wallet password.
///
/// Tries the record's stored IV first and falls back to the legacy fixed
/// IV, since pre-migration records were written with the hard-coded value.
/// A candidate key is accepted only if it also decrypts the stored
/// password payload to a well-formed padded credential; a wrong IV
/// corrupts the padding marker.
pub fn recover_backup_key(
    record: &CredentialRecord,
    password: &[u8],
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, VaultError> {
    let password_key = derive_key(password)?;

    for iv in [record.iv, LEGACY_FIXED_IV] {
        let Ok(bytes) = aes_decrypt(&record.encrypted_backup_key, &password_key, &iv) else {
            continue;
        };
        let bytes = Zeroizing::new(bytes);
        if bytes.len() != AES_KEY_LENGTH {
            continue;
        }
        let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        key.copy_from_slice(&bytes);

        let password_payload_ok = aes_decrypt(&record.encrypted_password, &key, &iv)
            .map(|padded| is_well_formed_padding(&padded))
            .unwrap_or(false);
        if password_payload_ok {
            return Ok(key);
        }
    }

    Err(VaultError::IncorrectCredential)
}

/// Recover the plaintext password using the wallet's original secret.
///
/// Used by backup/restore flows which hold the seed or entropy but not the
/// password. Both IV read paths are supported.
pub fn recover_password(
    record: &CredentialRecord,
    secret: &[u8],
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let secret_key = derive_key(secret)?;

    let mut malformed = false;
    for iv in [record.iv, LEGACY_FIXED_IV] {
        let Ok(padded) = aes_decrypt(&record.encrypted_password, &secret_key, &iv) else {
            continue;
        };
        let padded = Zeroizing::new(padded);
        match unpad_password(&padded) {
            Ok(password) => return Ok(Zeroizing::new(password)),
            Err(VaultError::MalformedCredentialRecord) => malformed = true,
            Err(_) => {}
        }
    }

    if malformed {
        Err(VaultError::MalformedCredentialRecord)
    } else {
        Err(VaultError::IncorrectCredential)
    }
}

/// Rotation path for a password change.
///
/// Recovers K1 under the old password, derives K2' from the new password
/// and re-encrypts both fields under a fresh random IV. The backup key
/// bytes are unchanged; only their encryption rotates. The original
/// seed/entropy is not required.
pub fn rotate_credentials(
    record: &CredentialRecord,
    old_password: &[u8],
    new_password: &[u8],
) -> Result<CredentialRecord, VaultError> {
    let backup_key = recover_backup_key(record, old_password)?;
    let new_password_key = derive_key(new_password)?;
    let iv = generate_iv();

    let padded = Zeroizing::new(pad_password(new_password));
    let encrypted_password = aes_encrypt(&padded, &backup_key, &iv);
    let encrypted_backup_key = aes_encrypt(backup_key.as_slice(), &new_password_key, &iv);

    Ok(CredentialRecord {
        encrypted_password,
        encrypted_backup_key,
        iv,
    })
}

/// Whether a decrypted payload carries one of the four markers the padding
/// scheme can produce, with a password length consistent with that tier.
/// Used to disambiguate the IV read paths; decrypting under the wrong IV
/// corrupts the marker block.
fn is_well_formed_padding(padded: &[u8]) -> bool {
    let Some((&marker, rest)) = padded.split_first() else {
        return false;
    };
    let filler_len = marker as usize;
    if filler_len > rest.len() {
        return false;
    }
    let password_len = rest.len() - filler_len;
    match marker {
        0x00 => password_len > AES_BLOCK_LENGTH * 3,
        0x10 => password_len > AES_BLOCK_LENGTH * 2 && password_len <= AES_BLOCK_LENGTH * 3,
        0x20 => password_len > AES_BLOCK_LENGTH && password_len <= AES_BLOCK_LENGTH * 2,
        0x30 => password_len <= AES_BLOCK_LENGTH,
        _ => false,
    }
}

mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

mod serde_hex_iv {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::AES_IV_LENGTH;

    pub fn serialize<S: Serializer>(
        iv: &[u8; AES_IV_LENGTH],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(iv))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; AES_IV_LENGTH], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("IV must be 16 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_round_trip() {
        for len in [0usize, 1, 8, 16, 17, 32, 33, 48, 49, 100] {
            let password = vec![0x61u8; len];
            let padded = pad_password(&password);
            assert_eq!(unpad_password(&padded).unwrap(), password, "length {len}");
        }
    }

    #[test]
    fn test_padding_tiers() {
        // > 3 blocks: marker only
        assert_eq!(pad_password(&[0u8; 49]).len(), 50);
        // 2-3 blocks: marker + 16 filler
        assert_eq!(pad_password(&[0u8; 48]).len(), 1 + 16 + 48);
        assert_eq!(pad_password(&[0u8; 33]).len(), 1 + 16 + 33);
        // 1-2 blocks: marker + 32 filler
        assert_eq!(pad_password(&[0u8; 32]).len(), 1 + 32 + 32);
        assert_eq!(pad_password(&[0u8; 17]).len(), 1 + 32 + 17);
        // <= 1 block: marker + 48 filler
        assert_eq!(pad_password(&[0u8; 16]).len(), 1 + 48 + 16);
        assert_eq!(pad_password(&[]).len(), 1 + 48);
    }

    #[test]
    fn test_padding_markers() {
        assert_eq!(pad_password(&[0u8; 49])[0], 0x00);
        assert_eq!(pad_password(&[0u8; 40])[0], 0x10);
        assert_eq!(pad_password(&[0u8; 20])[0], 0x20);
        assert_eq!(pad_password(&[0u8; 10])[0], 0x30);
    }

    #[test]
    fn test_unpad_rejects_oversized_marker() {
        // marker claims 5 filler bytes but only 3 remain
        let bad = [5u8, 1, 2, 3];
        assert_eq!(
            unpad_password(&bad),
            Err(VaultError::MalformedCredentialRecord)
        );
    }

    #[test]
    fn test_unpad_rejects_empty() {
        assert_eq!(unpad_password(&[]), Err(VaultError::MalformedCredentialRecord));
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = derive_key(b"secret").unwrap();
        let b = derive_key(b"secret").unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
        let c = derive_key(b"other").unwrap();
        assert_ne!(a.as_slice(), c.as_slice());
    }

    #[test]
    fn test_protect_and_recover_password() {
        let seed = [0x11u8; 64];
        let record = protect_credentials(&seed, b"correct horse").unwrap();
        let recovered = recover_password(&record, &seed).unwrap();
        assert_eq!(recovered.as_slice(), b"correct horse");
    }

    #[test]
    fn test_recover_password_with_wrong_secret_fails() {
        let record = protect_credentials(&[0x11u8; 64], b"password").unwrap();
        let err = recover_password(&record, &[0x22u8; 64]).unwrap_err();
        assert_eq!(err, VaultError::IncorrectCredential);
    }

    #[test]
    fn test_recover_backup_key_matches_secret_key() {
        let seed = [0x33u8; 64];
        let record = protect_credentials(&seed, b"password").unwrap();
        let backup_key = recover_backup_key(&record, b"password").unwrap();
        let secret_key = derive_key(&seed).unwrap();
        assert_eq!(backup_key.as_slice(), secret_key.as_slice());
    }

    #[test]
    fn test_rotation_preserves_backup_key() {
        let seed = [0x44u8; 64];
        let record = protect_credentials(&seed, b"old password").unwrap();
        let before = recover_backup_key(&record, b"old password").unwrap();

        let rotated = rotate_credentials(&record, b"old password", b"new password").unwrap();
        let after = recover_backup_key(&rotated, b"new password").unwrap();

        assert_eq!(before.as_slice(), after.as_slice());
        assert_ne!(record.iv, rotated.iv);
    }

    #[test]
    fn test_rotation_recovers_new_password_from_secret() {
        let seed = [0x55u8; 64];
        let record = protect_credentials(&seed, b"old password").unwrap();
        let rotated = rotate_credentials(&record, b"old password", b"new password").unwrap();
        let recovered = recover_password(&rotated, &seed).unwrap();
        assert_eq!(recovered.as_slice(), b"new password");
    }

    #[test]
    fn test_rotation_with_wrong_old_password_fails() {
        let record = protect_credentials(&[0x66u8; 64], b"old password").unwrap();
        let err = rotate_credentials(&record, b"not the password", b"new").unwrap_err();
        assert_eq!(err, VaultError::IncorrectCredential);
    }

    fn legacy_record(seed: &[u8], password: &[u8]) -> CredentialRecord {
        let secret_key = derive_key(seed).unwrap();
        let password_key = derive_key(password).unwrap();
        let padded = pad_password(password);
        CredentialRecord {
            encrypted_password: aes_encrypt(&padded, &secret_key, &LEGACY_FIXED_IV),
            encrypted_backup_key: aes_encrypt(
                secret_key.as_slice(),
                &password_key,
                &LEGACY_FIXED_IV,
            ),
            iv: LEGACY_FIXED_IV,
        }
    }

    #[test]
    fn test_legacy_fixed_iv_read_path() {
        // A pre-migration record: both fields encrypted under the
        // hard-coded IV, which is also what the sidecar field defaults to.
        let seed = [0x77u8; 64];
        let password = b"legacy password";
        let record = legacy_record(&seed, password);
        let secret_key = derive_key(&seed).unwrap();

        let recovered = recover_password(&record, &seed).unwrap();
        assert_eq!(recovered.as_slice(), password);

        let backup_key = recover_backup_key(&record, password).unwrap();
        assert_eq!(backup_key.as_slice(), secret_key.as_slice());

        // Rotation migrates the record onto a random IV.
        let rotated = rotate_credentials(&record, password, b"fresh password").unwrap();
        assert_ne!(rotated.iv, LEGACY_FIXED_IV);
        let after = recover_backup_key(&rotated, b"fresh password").unwrap();
        assert_eq!(after.as_slice(), secret_key.as_slice());
    }

    #[test]
    fn test_backup_key_survives_a_mismatched_iv_field() {
        // The record content was written under the legacy IV but the
        // sidecar field carries an unrelated value. The stored-IV
        // candidate fails the padding probe and the legacy path wins.
        let seed = [0x78u8; 64];
        let password = b"legacy password";
        let mut record = legacy_record(&seed, password);
        record.iv = [0u8; AES_IV_LENGTH];

        let backup_key = recover_backup_key(&record, password).unwrap();
        let secret_key = derive_key(&seed).unwrap();
        assert_eq!(backup_key.as_slice(), secret_key.as_slice());
    }

    #[test]
    fn test_record_without_iv_field_defaults_to_legacy_iv() {
        let record = legacy_record(&[0x79u8; 32], b"pw");
        let json = format!(
            "{{\"encrypted_password\":\"{}\",\"encrypted_backup_key\":\"{}\"}}",
            hex::encode(&record.encrypted_password),
            hex::encode(&record.encrypted_backup_key),
        );
        let parsed: CredentialRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.iv, LEGACY_FIXED_IV);
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_ciphertext_length_buckets() {
        // A 1-byte, a 30-byte and a 46-byte password all land in the same
        // ciphertext-length bucket, so the record does not betray which
        // tier padded them.
        let seed = [0x01u8; 32];
        let tiers = [
            protect_credentials(&seed, b"a").unwrap(),
            protect_credentials(&seed, &[0x62u8; 30]).unwrap(),
            protect_credentials(&seed, &[0x63u8; 46]).unwrap(),
        ];
        assert_eq!(tiers[0].encrypted_password.len(), tiers[1].encrypted_password.len());
        assert_eq!(tiers[1].encrypted_password.len(), tiers[2].encrypted_password.len());
    }

    #[test]
    fn test_credential_record_serde_round_trip() {
        let record = protect_credentials(&[0x12u8; 32], b"pw").unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let back: CredentialRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
