//! Secret key descriptors and the registry contract consumed by list replay.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::pack::{Packable, Packer, Unpacker};

pub const SECRET_KEY_LEN: usize = 32;

/// Scope key for submit accounts and secret keys of one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeIndex(i64);

impl ScopeIndex {
    pub fn for_list(list_id: i64) -> Self {
        Self(list_id)
    }

    pub fn list_id(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ScopeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "list:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKeyType {
    Random,
    GroupDerived,
    Imported,
}

impl SecretKeyType {
    fn as_u8(self) -> u8 {
        match self {
            Self::Random => 0,
            Self::GroupDerived => 1,
            Self::Imported => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Random),
            1 => Ok(Self::GroupDerived),
            2 => Ok(Self::Imported),
            other => Err(Error::malformed(format!("unknown secret key type {}", other))),
        }
    }
}

/// Public descriptor of a secret key. Travels inside every encrypted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyInfo {
    pub secret_id: u64,
    pub key_type: SecretKeyType,
}

impl Packable for SecretKeyInfo {
    fn pack(&self, packer: &mut Packer) {
        packer.pack_u64(self.secret_id);
        packer.pack_u8(self.key_type.as_u8());
    }

    fn unpack(unpacker: &mut Unpacker<'_>) -> Result<Self> {
        let secret_id = unpacker.unpack_u64()?;
        let key_type = SecretKeyType::from_u8(unpacker.unpack_u8()?)?;
        Ok(Self {
            secret_id,
            key_type,
        })
    }
}

/// Symmetric key material plus its descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    info: SecretKeyInfo,
    material: [u8; SECRET_KEY_LEN],
}

impl SecretKey {
    /// Wrap existing key material. The secret id is derived from the material.
    pub fn from_material(material: [u8; SECRET_KEY_LEN], key_type: SecretKeyType) -> Self {
        Self {
            info: SecretKeyInfo {
                secret_id: secret_id_for(&material),
                key_type,
            },
            material,
        }
    }

    pub fn generate() -> Self {
        let mut material = [0u8; SECRET_KEY_LEN];
        OsRng.fill_bytes(&mut material);
        Self::from_material(material, SecretKeyType::Random)
    }

    pub fn info(&self) -> SecretKeyInfo {
        self.info
    }

    pub fn secret_id(&self) -> u64 {
        self.info.secret_id
    }

    pub fn material(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.material
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("info", &self.info)
            .field("material", &"<redacted>")
            .finish()
    }
}

fn secret_id_for(material: &[u8; SECRET_KEY_LEN]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"todoledger-secret-id");
    hasher.update(material);
    let digest = hasher.finalize();
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(id)
}

/// Signal published when a key becomes available for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAdded {
    pub scope: ScopeIndex,
    pub info: SecretKeyInfo,
}

/// Per-scope lookup of decryption keys. Read-only from the replay side.
pub trait SecretKeyRegistry: Send + Sync {
    /// Candidate keys for `secret_id` in `scope`, in the order they should be tried.
    fn keys_for(&self, scope: ScopeIndex, secret_id: u64) -> Vec<SecretKey>;

    fn has_key_type(&self, scope: ScopeIndex, key_type: SecretKeyType) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_id_is_stable_for_material() {
        let a = SecretKey::from_material([7u8; SECRET_KEY_LEN], SecretKeyType::Imported);
        let b = SecretKey::from_material([7u8; SECRET_KEY_LEN], SecretKeyType::Random);
        let c = SecretKey::from_material([8u8; SECRET_KEY_LEN], SecretKeyType::Imported);
        assert_eq!(a.secret_id(), b.secret_id());
        assert_ne!(a.secret_id(), c.secret_id());
    }

    #[test]
    fn debug_output_hides_material() {
        let key = SecretKey::from_material([0xAB; SECRET_KEY_LEN], SecretKeyType::Random);
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("[171, 171"));
    }

    #[test]
    fn unknown_key_type_is_malformed() {
        let mut packer = Packer::new();
        packer.pack_u64(1);
        packer.pack_u8(42);
        let bytes = packer.into_bytes();
        assert!(SecretKeyInfo::unpack(&mut Unpacker::new(&bytes)).is_err());
    }
}
