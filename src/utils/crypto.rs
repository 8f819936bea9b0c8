use anyhow::anyhow;
use cipher::{block_padding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type AesCbcDec = cbc::Decryptor<aes::Aes256>;
type AesCbcEnc = cbc::Encryptor<aes::Aes256>;

/// AES-256-CBC with PKCS#7 padding.
pub fn decrypt_aes(key: &[u8], iv: &[u8], ct: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = AesCbcDec::new_from_slices(key, iv).map_err(|e| anyhow!(e))?;

    let pt = cipher
        .decrypt_padded_vec_mut::<block_padding::Pkcs7>(ct)
        .map_err(|e| anyhow!("{e:?}"))?;

    Ok(pt)
}

pub fn encrypt_aes(key: &[u8], iv: &[u8], pt: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = AesCbcEnc::new_from_slices(key, iv).map_err(|e| anyhow!(e))?;

    let ct = cipher.encrypt_padded_vec_mut::<block_padding::Pkcs7>(pt);

    Ok(ct)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";
    const IV: &[u8; 16] = b"fedcba9876543210";

    #[test]
    fn should_decrypt_what_was_encrypted() {
        let ct = encrypt_aes(KEY, IV, b"https://cdn.example/master.m3u8").unwrap();
        assert_eq!(ct.len() % 16, 0);

        let pt = decrypt_aes(KEY, IV, &ct).unwrap();
        assert_eq!(pt, b"https://cdn.example/master.m3u8");
    }

    #[test]
    fn should_reject_wrong_key_length() {
        assert!(decrypt_aes(b"short", IV, &[0u8; 16]).is_err());
    }
}
