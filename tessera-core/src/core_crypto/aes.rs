//! AES-128-CBC helpers
//!
//! Two shapes are used by the protocol: PKCS#7-padded CBC for variable
//! length payloads (key-at-rest codec, ECIES envelopes, vault key), and a
//! single unpadded block for the 16-byte status blob.

use aes::cipher::{block_padding::Pkcs7, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::Aes128;
use rand::RngCore;

use crate::error::{ServiceError, ServiceResult};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Generate a fresh random 16-byte IV
pub fn random_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// AES-128-CBC encrypt with PKCS#7 padding
pub fn cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-128-CBC decrypt with PKCS#7 padding
pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> ServiceResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(ServiceError::Cryptography(
            "ciphertext must be non-empty and block-aligned".to_string(),
        ));
    }
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ServiceError::Cryptography("invalid padding".to_string()))
}

/// Encrypt exactly one block, no padding. CBC of a single block is the
/// block cipher applied to `block XOR iv`.
pub fn encrypt_block(key: &[u8; 16], iv: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut buf = [0u8; 16];
    for i in 0..16 {
        buf[i] = block[i] ^ iv[i];
    }
    let mut ga = aes::cipher::generic_array::GenericArray::from(buf);
    cipher.encrypt_block(&mut ga);
    ga.into()
}

/// Decrypt exactly one block, no padding
pub fn decrypt_block(key: &[u8; 16], iv: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut ga = aes::cipher::generic_array::GenericArray::from(*block);
    cipher.decrypt_block(&mut ga);
    let mut out: [u8; 16] = ga.into();
    for i in 0..16 {
        out[i] ^= iv[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbc_round_trip() {
        let key = [0x42u8; 16];
        let iv = [0x13u8; 16];
        for len in [0usize, 1, 15, 16, 17, 64] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let ct = cbc_encrypt(&key, &iv, &data);
            assert!(ct.len() % 16 == 0 && ct.len() > data.len() - data.len() % 16);
            assert_eq!(cbc_decrypt(&key, &iv, &ct).unwrap(), data);
        }
    }

    #[test]
    fn test_cbc_wrong_key_fails_or_differs() {
        let key = [0x42u8; 16];
        let wrong = [0x43u8; 16];
        let iv = [0u8; 16];
        let data = b"sixteen byte msg";
        let ct = cbc_encrypt(&key, &iv, data);
        match cbc_decrypt(&wrong, &iv, &ct) {
            Ok(pt) => assert_ne!(pt, data),
            Err(_) => {}
        }
    }

    #[test]
    fn test_cbc_rejects_unaligned() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        assert!(cbc_decrypt(&key, &iv, &[0u8; 17]).is_err());
        assert!(cbc_decrypt(&key, &iv, &[]).is_err());
    }

    #[test]
    fn test_single_block_round_trip() {
        let key = [0xAAu8; 16];
        let iv = [0xBBu8; 16];
        let block = *b"0123456789abcdef";
        let ct = encrypt_block(&key, &iv, &block);
        assert_ne!(ct, block);
        assert_eq!(decrypt_block(&key, &iv, &ct), block);
    }

    #[test]
    fn test_iv_changes_ciphertext() {
        let key = [1u8; 16];
        let block = [2u8; 16];
        let a = encrypt_block(&key, &[3u8; 16], &block);
        let b = encrypt_block(&key, &[4u8; 16], &block);
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_iv_is_random() {
        assert_ne!(random_iv(), random_iv());
    }
}
