//! AES-128-CBC wrapping of manifest bodies.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{Error, Manifest, Result};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Per-region manifest cipher. Key and IV arrive as hex strings from the
/// region configuration.
#[derive(Clone)]
pub struct Cryptor {
    key: [u8; 16],
    iv: [u8; 16],
}

impl Cryptor {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self> {
        Ok(Self {
            key: decode_hex_16(key_hex, "key")?,
            iv: decode_hex_16(iv_hex, "iv")?,
        })
    }

    /// Decrypt and strip PKCS#7 padding.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| Error::DecryptFailed("bad PKCS#7 padding"))
    }

    /// Pad with PKCS#7 and encrypt.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data)
    }

    /// Decrypt an encrypted MessagePack body into any serde shape.
    pub fn unpack<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let plain = self.decrypt(data)?;
        Ok(rmp_serde::from_slice(&plain)?)
    }

    /// Serialize a serde shape to MessagePack and encrypt it.
    pub fn pack<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let plain = rmp_serde::to_vec_named(value)?;
        Ok(self.encrypt(&plain))
    }

    /// Decrypt and decode a bundle manifest.
    pub fn unpack_manifest(&self, data: &[u8]) -> Result<Manifest> {
        let manifest: Manifest = self.unpack(data)?;
        debug!(bundles = manifest.bundles.len(), "decoded bundle manifest");
        Ok(manifest)
    }
}

fn decode_hex_16(hex_str: &str, what: &'static str) -> Result<[u8; 16]> {
    let bytes = hex::decode(hex_str).map_err(|_| Error::KeyMaterial(what))?;
    bytes.try_into().map_err(|_| Error::KeyMaterial(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cryptor() -> Cryptor {
        Cryptor::from_hex(
            "000102030405060708090a0b0c0d0e0f",
            "f0e0d0c0b0a090807060504030201000",
        )
        .unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let c = cryptor();
        let plain = b"not quite a block multiple".to_vec();

        let encrypted = c.encrypt(&plain);
        assert_ne!(encrypted, plain);
        assert_eq!(encrypted.len() % 16, 0);
        assert_eq!(c.decrypt(&encrypted).unwrap(), plain);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let c = cryptor();
        let mut encrypted = c.encrypt(b"payload bytes here");
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;
        assert!(matches!(
            c.decrypt(&encrypted),
            Err(Error::DecryptFailed(_))
        ));
    }

    #[test]
    fn test_bad_key_material() {
        assert!(matches!(
            Cryptor::from_hex("zz", "f0e0d0c0b0a090807060504030201000"),
            Err(Error::KeyMaterial("key"))
        ));
        assert!(matches!(
            Cryptor::from_hex("0011", "f0e0d0c0b0a090807060504030201000"),
            Err(Error::KeyMaterial("key"))
        ));
    }
}
