//! Local records of the wallets this machine can act as.
//!
//! [`WalletStore`] is the seam; [`FileWalletStore`] keeps everything in one
//! JSON document. Secrets are only ever stored inside a [`Keystore`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tessera_types::{Timestamp, WalletAddress};

use crate::authority::{Authorization, GeneratedWallet};
use crate::error::WalletError;
use crate::identity::Identity;
use crate::keystore::{decrypt_secret, encrypt_secret_with, KdfParams, Keystore};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub address: WalletAddress,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    pub created_at: Timestamp,
    pub keystore: Keystore,
}

impl WalletRecord {
    /// Seal a wallet issued by the authority under `password`.
    pub fn seal(
        wallet: &GeneratedWallet,
        label: Option<String>,
        password: &str,
        kdf_params: KdfParams,
    ) -> Result<Self, WalletError> {
        let secret = Authorization::new(wallet.private_key.clone());
        Ok(Self {
            address: wallet.address.clone(),
            public_key: wallet.public_key.clone(),
            label,
            created_at: Timestamp::now(),
            keystore: encrypt_secret_with(&secret, password, kdf_params)?,
        })
    }

    /// Decrypt the record into a signing identity.
    pub fn unlock(&self, password: &str) -> Result<Identity, WalletError> {
        let secret = decrypt_secret(&self.keystore, password)?;
        Ok(Identity::with_authorization(self.address.clone(), secret))
    }
}

pub trait WalletStore: Send + Sync {
    fn list(&self) -> Result<Vec<WalletRecord>, WalletError>;

    fn get(&self, address: &WalletAddress) -> Result<Option<WalletRecord>, WalletError>;

    /// Insert or replace the record for its address.
    fn put(&self, record: WalletRecord) -> Result<(), WalletError>;

    fn remove(&self, address: &WalletAddress) -> Result<bool, WalletError>;

    fn active(&self) -> Result<Option<WalletAddress>, WalletError>;

    /// Mark a stored wallet as the default identity.
    fn set_active(&self, address: &WalletAddress) -> Result<(), WalletError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WalletFile {
    #[serde(default)]
    active: Option<WalletAddress>,
    #[serde(default)]
    wallets: Vec<WalletRecord>,
}

/// JSON file backed [`WalletStore`]. Every call reads the file and every
/// mutation rewrites it.
pub struct FileWalletStore {
    path: PathBuf,
}

impl FileWalletStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<WalletFile, WalletError> {
        if !self.path.exists() {
            return Ok(WalletFile::default());
        }
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            WalletError::Store(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            WalletError::Store(format!("invalid wallet file {}: {}", self.path.display(), e))
        })
    }

    fn save(&self, file: &WalletFile) -> Result<(), WalletError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                WalletError::Store(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(file)
            .map_err(|e| WalletError::Store(format!("JSON serialization failed: {}", e)))?;
        // Replace atomically; readers never see a partial file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| WalletError::Store(format!("failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            WalletError::Store(format!("failed to replace {}: {}", self.path.display(), e))
        })
    }
}

impl WalletStore for FileWalletStore {
    fn list(&self) -> Result<Vec<WalletRecord>, WalletError> {
        Ok(self.load()?.wallets)
    }

    fn get(&self, address: &WalletAddress) -> Result<Option<WalletRecord>, WalletError> {
        Ok(self
            .load()?
            .wallets
            .into_iter()
            .find(|r| &r.address == address))
    }

    fn put(&self, record: WalletRecord) -> Result<(), WalletError> {
        let mut file = self.load()?;
        match file.wallets.iter_mut().find(|r| r.address == record.address) {
            Some(existing) => *existing = record,
            None => {
                // The first wallet becomes the default.
                if file.active.is_none() {
                    file.active = Some(record.address.clone());
                }
                file.wallets.push(record);
            }
        }
        self.save(&file)
    }

    fn remove(&self, address: &WalletAddress) -> Result<bool, WalletError> {
        let mut file = self.load()?;
        let before = file.wallets.len();
        file.wallets.retain(|r| &r.address != address);
        if file.wallets.len() == before {
            return Ok(false);
        }
        if file.active.as_ref() == Some(address) {
            file.active = file.wallets.first().map(|r| r.address.clone());
        }
        self.save(&file)?;
        Ok(true)
    }

    fn active(&self) -> Result<Option<WalletAddress>, WalletError> {
        Ok(self.load()?.active)
    }

    fn set_active(&self, address: &WalletAddress) -> Result<(), WalletError> {
        let mut file = self.load()?;
        if !file.wallets.iter().any(|r| &r.address == address) {
            return Err(WalletError::Store(format!("no stored wallet {}", address)));
        }
        file.active = Some(address.clone());
        self.save(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn record(address: &str) -> WalletRecord {
        let wallet = GeneratedWallet {
            address: WalletAddress::new(address),
            public_key: Some(format!("pub-{address}")),
            private_key: format!("secret-{address}"),
        };
        WalletRecord::seal(&wallet, None, "pw", fast()).unwrap()
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWalletStore::new(dir.path().join("wallets.json"));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.active().unwrap(), None);
    }

    #[test]
    fn first_wallet_becomes_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWalletStore::new(dir.path().join("wallets.json"));
        store.put(record("alice")).unwrap();
        store.put(record("bob")).unwrap();
        assert_eq!(store.active().unwrap(), Some(WalletAddress::new("alice")));
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn set_active_requires_a_stored_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWalletStore::new(dir.path().join("wallets.json"));
        store.put(record("alice")).unwrap();
        assert!(store.set_active(&WalletAddress::new("carol")).is_err());
        store.put(record("bob")).unwrap();
        store.set_active(&WalletAddress::new("bob")).unwrap();
        assert_eq!(store.active().unwrap(), Some(WalletAddress::new("bob")));
    }

    #[test]
    fn removing_the_active_wallet_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWalletStore::new(dir.path().join("nested").join("wallets.json"));
        store.put(record("alice")).unwrap();
        store.put(record("bob")).unwrap();
        assert!(store.remove(&WalletAddress::new("alice")).unwrap());
        assert!(!store.remove(&WalletAddress::new("alice")).unwrap());
        assert_eq!(store.active().unwrap(), Some(WalletAddress::new("bob")));
    }

    #[test]
    fn records_unlock_into_signing_identities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        FileWalletStore::new(&path).put(record("alice")).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret-alice"));

        let reopened = FileWalletStore::new(&path);
        let stored = reopened.get(&WalletAddress::new("alice")).unwrap().unwrap();
        let identity = stored.unlock("pw").unwrap();
        assert_eq!(identity.authorization().unwrap().expose(), "secret-alice");
        assert!(stored.unlock("nope").is_err());
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileWalletStore::new(&path).list().unwrap_err();
        assert!(matches!(err, WalletError::Store(_)));
    }
}
