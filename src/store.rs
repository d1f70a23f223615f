use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    attestation::{AttestationKind, StoredAttestation},
    core::storage::Storage,
    credential::StoredCredential,
    Error, Result,
};

const CREDENTIAL_PREFIX: &str = "credential:";

/// Typed access to the wallet's credential and attestation slots.
///
/// Each slot holds a single value which is replaced wholesale when written. Concurrent writers
/// are not coordinated: the last write wins.
#[derive(Debug)]
pub struct CredentialStore<S> {
    storage: S,
}

impl<S: Storage> CredentialStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub async fn credential(&self, type_key: &str) -> Result<Option<StoredCredential>> {
        self.read(&credential_key(type_key)).await
    }

    pub async fn put_credential(&self, type_key: &str, credential: &StoredCredential) -> Result<()> {
        self.write(&credential_key(type_key), credential).await
    }

    pub async fn delete_credential(&self, type_key: &str) -> Result<()> {
        self.storage
            .delete(&credential_key(type_key))
            .await
            .map_err(Error::storage)
    }

    pub async fn attestation(&self, kind: AttestationKind) -> Result<Option<StoredAttestation>> {
        self.read(kind.storage_key()).await
    }

    pub async fn put_attestation(&self, attestation: &StoredAttestation) -> Result<()> {
        self.write(attestation.kind.storage_key(), attestation).await
    }

    pub async fn delete_attestation(&self, kind: AttestationKind) -> Result<()> {
        self.storage
            .delete(kind.storage_key())
            .await
            .map_err(Error::storage)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.storage.get(key).await.map_err(Error::storage)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        debug!("writing '{key}'");
        self.storage.put(key, bytes).await.map_err(Error::storage)
    }
}

fn credential_key(type_key: &str) -> String {
    format!("{CREDENTIAL_PREFIX}{type_key}")
}
