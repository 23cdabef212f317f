//! HMAC digests and AES-128-CBC secret handling.

use aes::Aes128;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use thiserror::Error;

use crate::config::KeyMode;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const AES_BLOCK: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key material must be at least {AES_BLOCK} bytes, got {0}")]
    ShortKey(usize),

    #[error("iv must be {AES_BLOCK} bytes, got {0}")]
    InvalidIv(usize),

    #[error("invalid key length")]
    InvalidLength,

    #[error("invalid hex key: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid base64 ciphertext: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decryption failed: bad padding")]
    Padding,

    #[error("decrypted secret is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// HMAC-SHA256 of `message`, base64 encoded.
pub fn hmac_sha256_base64(message: &str, key: &[u8]) -> Result<String, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidLength)?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// HMAC-SHA1 of `message` keyed by a hex-encoded key, hex encoded.
pub fn hmac_sha1_hex(message: &str, hex_key: &str) -> Result<String, CryptoError> {
    let key = hex::decode(hex_key)?;
    let mut mac = HmacSha1::new_from_slice(&key).map_err(|_| CryptoError::InvalidLength)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// AES-128 key derived from configured key material.
fn derive_key(material: &str, mode: KeyMode) -> Result<[u8; AES_BLOCK], CryptoError> {
    let mut key = [0u8; AES_BLOCK];
    match mode {
        KeyMode::Padded => {
            let bytes = material.as_bytes();
            if bytes.len() < AES_BLOCK {
                return Err(CryptoError::ShortKey(bytes.len()));
            }
            key.copy_from_slice(&bytes[..AES_BLOCK]);
        }
        KeyMode::Sha => {
            let digest = Sha1::digest(material.as_bytes());
            key.copy_from_slice(&digest[..AES_BLOCK]);
        }
    }
    Ok(key)
}

fn iv_bytes(iv: &str) -> Result<&[u8], CryptoError> {
    let bytes = iv.as_bytes();
    if bytes.len() != AES_BLOCK {
        return Err(CryptoError::InvalidIv(bytes.len()));
    }
    Ok(bytes)
}

/// Encrypt a secret with AES-128-CBC/PKCS7; returns base64 ciphertext.
pub fn encrypt_secret(
    plaintext: &str,
    material: &str,
    iv: &str,
    mode: KeyMode,
) -> Result<String, CryptoError> {
    let key = derive_key(material, mode)?;
    let cipher =
        Aes128CbcEnc::new_from_slices(&key, iv_bytes(iv)?).map_err(|_| CryptoError::InvalidLength)?;
    Ok(BASE64.encode(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes())))
}

/// Inverse of [`encrypt_secret`].
pub fn decrypt_secret(
    ciphertext: &str,
    material: &str,
    iv: &str,
    mode: KeyMode,
) -> Result<String, CryptoError> {
    let key = derive_key(material, mode)?;
    let data = BASE64.decode(ciphertext.trim())?;
    let cipher =
        Aes128CbcDec::new_from_slices(&key, iv_bytes(iv)?).map_err(|_| CryptoError::InvalidLength)?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&data)
        .map_err(|_| CryptoError::Padding)?;
    Ok(String::from_utf8(plain)?)
}
