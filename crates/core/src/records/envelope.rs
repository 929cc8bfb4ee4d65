//! Encryption envelope around task and list-name records.
//!
//! Wire form: `SecretKeyInfo | nonce[24] | u32 len | ciphertext`. The
//! ciphertext is the tagged record bytes sealed with XChaCha20-Poly1305; the
//! record kind and secret id are bound as associated data.

use std::marker::PhantomData;

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use super::Record;
use crate::errors::{Error, Result};
use crate::pack::{Packable, Packer, Unpacker};
use crate::secrets::{SecretKey, SecretKeyInfo};

pub const NONCE_LEN: usize = 24;

#[derive(Debug, Clone)]
pub struct EncryptedRecord<R> {
    key_info: SecretKeyInfo,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    _record: PhantomData<R>,
}

impl<R: Record> EncryptedRecord<R> {
    /// Structural parse of the envelope. Never needs the key.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let mut unpacker = Unpacker::new(raw);
        let key_info = SecretKeyInfo::unpack(&mut unpacker)?;
        let nonce = unpacker.unpack_raw::<NONCE_LEN>()?;
        let ciphertext = unpacker.unpack_bytes()?.to_vec();
        Ok(Self {
            key_info,
            nonce,
            ciphertext,
            _record: PhantomData,
        })
    }

    pub fn encrypt(key: &SecretKey, record: &R) -> Result<Self> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.material())
            .map_err(|_| Error::Crypto("invalid key length".to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let key_info = key.info();
        let aad = associated_data::<R>(&key_info);
        let plaintext = record.to_bytes();
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Crypto("encrypt failed".to_string()))?;

        Ok(Self {
            key_info,
            nonce,
            ciphertext,
            _record: PhantomData,
        })
    }

    pub fn key_info(&self) -> SecretKeyInfo {
        self.key_info
    }

    /// `Ok(None)` when the key does not authenticate the envelope; callers try
    /// the next candidate. `Err` only when authenticated bytes fail to decode.
    pub fn decrypt(&self, key: &SecretKey) -> Result<Option<R>> {
        let Ok(cipher) = XChaCha20Poly1305::new_from_slice(key.material()) else {
            return Ok(None);
        };
        let aad = associated_data::<R>(&self.key_info);
        let plaintext = match cipher.decrypt(
            XNonce::from_slice(&self.nonce),
            Payload {
                msg: &self.ciphertext,
                aad: &aad,
            },
        ) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };
        R::from_bytes(&plaintext).map(Some)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packer = Packer::new();
        self.key_info.pack(&mut packer);
        packer.pack_raw(&self.nonce);
        packer.pack_bytes(&self.ciphertext);
        packer.into_bytes()
    }
}

fn associated_data<R: Record>(key_info: &SecretKeyInfo) -> Vec<u8> {
    let mut aad = Vec::with_capacity(9);
    aad.push(R::KIND.tag());
    aad.extend_from_slice(&key_info.secret_id.to_le_bytes());
    aad
}
