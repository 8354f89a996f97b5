//! Resource and secret stores.
//!
//! The reconciler only needs to read an issuer, write back its status and
//! read the credentials secret. The in-memory stores back tests and the
//! standalone tool.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, ScepError};
use crate::issuer::{CHALLENGE_SECRET_KEY, IssuerKey, NamespacedName, ScepIssuer};

/// Contents of a secret.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Access to issuer resources.
#[async_trait]
pub trait IssuerStore: Send + Sync {
    /// Fetch an issuer. `Ok(None)` means it does not exist.
    async fn get(&self, key: &IssuerKey) -> Result<Option<ScepIssuer>>;

    /// Persist the status subresource of `issuer`.
    async fn update_status(&self, issuer: &ScepIssuer) -> Result<()>;
}

/// Access to secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret. A missing secret is an error.
    async fn get(&self, name: &NamespacedName) -> Result<SecretData>;
}

/// Issuers held in memory.
#[derive(Debug, Default)]
pub struct MemoryIssuerStore {
    issuers: RwLock<BTreeMap<IssuerKey, ScepIssuer>>,
}

impl MemoryIssuerStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an issuer.
    pub async fn insert(&self, issuer: ScepIssuer) {
        self.issuers.write().await.insert(issuer.key(), issuer);
    }

    /// Delete an issuer, returning it if it existed.
    pub async fn remove(&self, key: &IssuerKey) -> Option<ScepIssuer> {
        self.issuers.write().await.remove(key)
    }
}

#[async_trait]
impl IssuerStore for MemoryIssuerStore {
    async fn get(&self, key: &IssuerKey) -> Result<Option<ScepIssuer>> {
        Ok(self.issuers.read().await.get(key).cloned())
    }

    async fn update_status(&self, issuer: &ScepIssuer) -> Result<()> {
        let key = issuer.key();
        match self.issuers.write().await.get_mut(&key) {
            Some(stored) => {
                stored.status = issuer.status.clone();
                Ok(())
            }
            None => Err(ScepError::store(format!("{} not found", key))),
        }
    }
}

/// Secrets held in memory.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<BTreeMap<NamespacedName, SecretData>>,
}

impl std::fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretStore").finish_non_exhaustive()
    }
}

impl MemorySecretStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a secret.
    pub async fn insert(&self, name: NamespacedName, data: SecretData) {
        self.secrets.write().await.insert(name, data);
    }

    /// Create or replace a secret holding only a challenge password.
    pub async fn insert_challenge(&self, name: NamespacedName, challenge: &str) {
        let data = SecretData::from([(
            CHALLENGE_SECRET_KEY.to_string(),
            challenge.as_bytes().to_vec(),
        )]);
        self.insert(name, data).await;
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &NamespacedName) -> Result<SecretData> {
        self.secrets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ScepError::store(format!("secret {} not found", name)))
    }
}

/// The challenge password held by a credentials secret.
///
/// A secret without a `challenge` key yields the empty string, which
/// disables challenge injection.
pub fn challenge_from_secret(secret: &SecretData) -> Result<String> {
    match secret.get(CHALLENGE_SECRET_KEY) {
        Some(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| ScepError::Secret("challenge is not valid UTF-8".to_string())),
        None => Ok(String::new()),
    }
}
