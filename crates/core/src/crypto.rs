//! Hashing and payload encryption.
//!
//! Payloads are encrypted with AES-256 in ECB mode and PKCS#7 padding, which is what the
//! injected runtime helpers decrypt with (`AES/ECB/PKCS5Padding`). Asset and library payloads
//! use the raw 32-byte session secret as key; strings use a PBKDF2-HMAC-SHA1 derived key and
//! are stored hex encoded.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use dexcloak_utils::errors::CryptoError;
use md5::{Digest, Md5};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Length of the session secret and of every AES key.
pub const KEY_SIZE: usize = 32;

/// PBKDF2 iteration count used for string keys.
pub const STRING_KEY_ITERATIONS: u32 = 128;

/// Lowercase hex MD5 digest of `input`.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Deterministic replacement identifier: `prefix` followed by the first 8 hex chars of
/// MD5(`name`).
pub fn hashed_identifier(prefix: &str, name: &str) -> String {
    let digest = md5_hex(name);
    format!("{prefix}{}", &digest[..8])
}

fn cipher(key: &[u8]) -> Result<Aes256, CryptoError> {
    Aes256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

/// Encrypts `plaintext` with AES-256-ECB and PKCS#7 padding.
pub fn encrypt_ecb(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;

    let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut buf = Vec::with_capacity(plaintext.len() + pad);
    buf.extend_from_slice(plaintext);
    buf.resize(plaintext.len() + pad, pad as u8);

    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(buf)
}

/// Reverses [`encrypt_ecb`], validating the padding.
pub fn decrypt_ecb(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
    }
    let cipher = cipher(key)?;

    let mut buf = ciphertext.to_vec();
    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }

    let pad = usize::from(*buf.last().ok_or(CryptoError::InvalidPadding)?);
    if pad == 0 || pad > BLOCK_SIZE || buf[buf.len() - pad..].iter().any(|&b| usize::from(b) != pad) {
        return Err(CryptoError::InvalidPadding);
    }
    buf.truncate(buf.len() - pad);
    Ok(buf)
}

/// Key used for string payloads: PBKDF2-HMAC-SHA1 with the secret as both password and salt.
pub fn derive_string_key(secret: &str) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha1>(
        secret.as_bytes(),
        secret.as_bytes(),
        STRING_KEY_ITERATIONS,
        &mut key,
    );
    key
}

/// Encrypts a string payload and returns it hex encoded.
pub fn encrypt_string(secret: &str, plaintext: &str) -> Result<String, CryptoError> {
    let key = derive_string_key(secret);
    Ok(hex::encode(encrypt_ecb(&key, plaintext.as_bytes())?))
}

/// Reverses [`encrypt_string`].
pub fn decrypt_string(secret: &str, encoded: &str) -> Result<String, CryptoError> {
    let key = derive_string_key(secret);
    let plain = decrypt_ecb(&key, &hex::decode(encoded)?)?;
    Ok(String::from_utf8_lossy(&plain).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "abcdefghijklmnopqrstuvwxyz012345";

    #[test]
    fn identifiers_are_stable() {
        assert_eq!(md5_hex("hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(hashed_identifier("p", "hello"), "p5d41402a");
        assert_eq!(
            hashed_identifier("m", "doWork"),
            hashed_identifier("m", "doWork")
        );
    }

    #[test]
    fn ecb_round_trip() {
        for len in [0usize, 1, 15, 16, 17, 1000] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let encrypted = encrypt_ecb(SECRET.as_bytes(), &payload).unwrap();
            assert_eq!(encrypted.len() % BLOCK_SIZE, 0);
            assert!(encrypted.len() > payload.len());
            assert_eq!(decrypt_ecb(SECRET.as_bytes(), &encrypted).unwrap(), payload);
        }
    }

    #[test]
    fn rejects_bad_key_and_padding() {
        assert!(matches!(
            encrypt_ecb(b"short", b"x"),
            Err(CryptoError::InvalidKeyLength { actual: 5, .. })
        ));
        assert!(matches!(
            decrypt_ecb(SECRET.as_bytes(), &[0u8; 15]),
            Err(CryptoError::InvalidCiphertextLength(15))
        ));
    }

    #[test]
    fn string_round_trip() {
        let encrypted = encrypt_string(SECRET, "Hello, world! ✓").unwrap();
        assert!(encrypted.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(decrypt_string(SECRET, &encrypted).unwrap(), "Hello, world! ✓");
        assert_ne!(derive_string_key(SECRET).as_slice(), SECRET.as_bytes());
    }
}
