//! CryptoJS / OpenSSL compatible passphrase encryption.
//!
//! A passphrase blob is `"Salted__" || salt[8] || ciphertext`, base64 encoded. Key and IV
//! are produced by `EVP_BytesToKey` with MD5 and a single iteration per digest.

use anyhow::anyhow;
use md5::{Digest, Md5};

use super::crypto;

pub const KEY_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 16;

const SALTED_MAGIC: &[u8] = b"Salted__";
const HEADER_LENGTH: usize = 16;

/// Decrypts a decoded `Salted__` blob, reading the salt from bytes `8..16`.
pub fn decrypt_aes_no_salt(password: &[u8], text: &[u8]) -> anyhow::Result<String> {
    if text.len() <= HEADER_LENGTH {
        return Err(anyhow!("ciphertext too short: {} bytes", text.len()));
    }

    let salt = &text[8..HEADER_LENGTH];
    let ct = &text[HEADER_LENGTH..];

    decrypt_aes(password, salt, ct)
}

/// Decrypts with an externally supplied salt. The first 16 bytes of `text` are a
/// header and are discarded.
pub fn decrypt_aes_with_salt(password: &[u8], salt: &[u8], text: &[u8]) -> anyhow::Result<String> {
    if text.len() <= HEADER_LENGTH {
        return Err(anyhow!("ciphertext too short: {} bytes", text.len()));
    }

    decrypt_aes(password, salt, &text[HEADER_LENGTH..])
}

pub fn decrypt_aes(password: &[u8], salt: &[u8], ct: &[u8]) -> anyhow::Result<String> {
    let (key, iv) = derive_key_and_iv(password, salt);

    let pt = crypto::decrypt_aes(&key, &iv, ct)?;

    String::from_utf8(pt).map_err(|e| anyhow!(e))
}

/// Inverse of [`decrypt_aes_no_salt`]: returns the raw `Salted__` blob.
pub fn encrypt_aes(password: &[u8], salt: &[u8; 8], pt: &[u8]) -> anyhow::Result<Vec<u8>> {
    let (key, iv) = derive_key_and_iv(password, salt);
    let ct = crypto::encrypt_aes(&key, &iv, pt)?;

    let mut blob = Vec::with_capacity(HEADER_LENGTH + ct.len());
    blob.extend_from_slice(SALTED_MAGIC);
    blob.extend_from_slice(salt);
    blob.extend_from_slice(&ct);
    Ok(blob)
}

pub fn derive_key_and_iv(password: &[u8], salt: &[u8]) -> (Vec<u8>, Vec<u8>) {
    const HASH_SIZE: usize = KEY_LENGTH + IV_LENGTH;
    const DIGIT_SIZE: usize = 16;

    let mut hash: [u8; HASH_SIZE] = [0; HASH_SIZE];
    let mut calculatated = 0;

    while calculatated < HASH_SIZE {
        let mut hasher = Md5::new();
        if calculatated > 0 {
            hasher.update(&hash[(calculatated - DIGIT_SIZE)..calculatated])
        }

        let out = hasher.chain_update(password).chain_update(salt).finalize();

        hash[calculatated..(calculatated + DIGIT_SIZE)].copy_from_slice(out.as_slice());

        calculatated += DIGIT_SIZE;
    }

    (hash[0..KEY_LENGTH].to_vec(), hash[KEY_LENGTH..].to_vec())
}
