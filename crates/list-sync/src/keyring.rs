//! In-memory secret key registry with per-list key derivation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use hkdf::Hkdf;
use log::debug;
use sha2::Sha256;
use tokio::sync::broadcast;
use todoledger_core::secrets::SECRET_KEY_LEN;
use todoledger_core::{
    Error, KeyAdded, Result, ScopeIndex, SecretKey, SecretKeyRegistry, SecretKeyType,
};

const GROUP_KEY_SALT: &[u8] = b"todoledger-group-key";

#[derive(Default)]
struct ScopeKeys {
    keys: Vec<SecretKey>,
    default_secret_id: Option<u64>,
}

/// Keys per list scope. Publishes a [`KeyAdded`] for every new key.
pub struct KeyRing {
    account_secret: [u8; SECRET_KEY_LEN],
    scopes: RwLock<HashMap<ScopeIndex, ScopeKeys>>,
    added: broadcast::Sender<KeyAdded>,
}

impl KeyRing {
    /// `account_secret` is the unlocked account key the group keys derive from.
    pub fn new(account_secret: [u8; SECRET_KEY_LEN]) -> Self {
        let (added, _) = broadcast::channel(64);
        Self {
            account_secret,
            scopes: RwLock::new(HashMap::new()),
            added,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeyAdded> {
        self.added.subscribe()
    }

    /// Stores `key` for `scope`. Returns false when it was already known.
    pub fn add_key(&self, scope: ScopeIndex, key: SecretKey, make_default: bool) -> bool {
        let info = key.info();
        {
            let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
            let entry = scopes.entry(scope).or_default();
            if entry.keys.iter().any(|k| k.secret_id() == info.secret_id) {
                return false;
            }
            entry.keys.push(key);
            if make_default {
                entry.default_secret_id = Some(info.secret_id);
            }
        }
        debug!("[KeyRing] Added {:?} key {} for {}", info.key_type, info.secret_id, scope);
        // No listener is fine.
        let _ = self.added.send(KeyAdded { scope, info });
        true
    }

    /// The key new records of `scope` are encrypted with: the explicit default,
    /// else the most recently added key.
    pub fn default_key(&self, scope: ScopeIndex) -> Option<SecretKey> {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        let entry = scopes.get(&scope)?;
        entry
            .default_secret_id
            .and_then(|id| entry.keys.iter().find(|k| k.secret_id() == id))
            .or_else(|| entry.keys.last())
            .cloned()
    }

    pub fn keys(&self, scope: ScopeIndex) -> Vec<SecretKey> {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        scopes
            .get(&scope)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default()
    }

    /// HKDF-SHA256 of the account secret, bound to the list id.
    pub fn derive_group_key(root: &[u8; SECRET_KEY_LEN], list_id: i64) -> Result<SecretKey> {
        let hk = Hkdf::<Sha256>::new(Some(GROUP_KEY_SALT), root);
        let mut material = [0u8; SECRET_KEY_LEN];
        hk.expand(&list_id.to_le_bytes(), &mut material)
            .map_err(|e| Error::Crypto(format!("group key derivation: {}", e)))?;
        Ok(SecretKey::from_material(material, SecretKeyType::GroupDerived))
    }

    /// Derives and installs a default group key for `list_id` unless its scope
    /// already has one. Returns the new key, if any.
    pub fn ensure_default_key(&self, list_id: i64) -> Result<Option<SecretKey>> {
        let scope = ScopeIndex::for_list(list_id);
        if self.has_key_type(scope, SecretKeyType::GroupDerived) {
            return Ok(None);
        }
        let key = Self::derive_group_key(&self.account_secret, list_id)?;
        self.add_key(scope, key.clone(), true);
        Ok(Some(key))
    }

    pub fn ensure_default_keys(&self, list_ids: impl IntoIterator<Item = i64>) -> Result<usize> {
        let mut created = 0;
        for list_id in list_ids {
            if self.ensure_default_key(list_id)?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    }
}

impl SecretKeyRegistry for KeyRing {
    fn keys_for(&self, scope: ScopeIndex, secret_id: u64) -> Vec<SecretKey> {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        scopes
            .get(&scope)
            .map(|entry| {
                entry
                    .keys
                    .iter()
                    .filter(|k| k.secret_id() == secret_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_key_type(&self, scope: ScopeIndex, key_type: SecretKeyType) -> bool {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        scopes
            .get(&scope)
            .is_some_and(|entry| entry.keys.iter().any(|k| k.info().key_type == key_type))
    }
}
