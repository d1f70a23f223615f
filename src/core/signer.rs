use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde_json::Value as Json;
use tokio::sync::Mutex;

/// Hardware key store capability.
///
/// Implementations sign with ES256 over P-256. `sign` may return either the raw `r || s`
/// concatenation or an ASN.1 DER encoded signature; callers normalize the encoding.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Sign `data` with the key identified by `alias`.
    async fn sign(&self, alias: &str, data: &[u8]) -> Result<Vec<u8>>;

    /// The public JWK of the key identified by `alias`.
    async fn public_jwk(&self, alias: &str) -> Result<Json>;

    /// The key attestation certificate chain of `alias`, leaf first, DER encoded.
    async fn attestation_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>>;

    /// Generate a fresh key pair under `alias`, replacing any existing one.
    ///
    /// `challenge` is bound into the key attestation when the key store supports it.
    async fn generate_key(&self, alias: &str, challenge: Option<&[u8]>) -> Result<()>;
}

/// Software P-256 signer keeping its keys in memory.
///
/// Intended for tests and deployments without a hardware key store. It has no key attestation
/// certificate issuer, so [attestation_chain](WalletSigner::attestation_chain) returns whatever
/// chain was registered with [P256Signer::with_chain].
#[derive(Debug, Default)]
pub struct P256Signer {
    keys: Mutex<BTreeMap<String, SigningKey>>,
    chains: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
}

impl P256Signer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing key under `alias`.
    pub async fn insert(&self, alias: impl Into<String>, key: SigningKey) {
        self.keys.lock().await.insert(alias.into(), key);
    }

    /// Register a certificate chain to be returned for `alias`.
    pub async fn with_chain(&self, alias: impl Into<String>, chain: Vec<Vec<u8>>) {
        self.chains.lock().await.insert(alias.into(), chain);
    }

    async fn key(&self, alias: &str) -> Result<SigningKey> {
        self.keys
            .lock()
            .await
            .get(alias)
            .cloned()
            .with_context(|| format!("no key with alias '{alias}'"))
    }
}

#[async_trait]
impl WalletSigner for P256Signer {
    async fn sign(&self, alias: &str, data: &[u8]) -> Result<Vec<u8>> {
        let signature: Signature = self.key(alias).await?.sign(data);
        Ok(signature.to_vec())
    }

    async fn public_jwk(&self, alias: &str) -> Result<Json> {
        let pk: p256::PublicKey = self.key(alias).await?.verifying_key().into();
        serde_json::from_str(&pk.to_jwk_string()).context("unable to serialize public key")
    }

    async fn attestation_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>> {
        let Some(chain) = self.chains.lock().await.get(alias).cloned() else {
            bail!("no attestation chain for key '{alias}'")
        };
        Ok(chain)
    }

    async fn generate_key(&self, alias: &str, _challenge: Option<&[u8]>) -> Result<()> {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        self.insert(alias, key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::{signature::Verifier, VerifyingKey};

    #[tokio::test]
    async fn generated_key_signs_and_exposes_jwk() {
        let signer = P256Signer::new();
        signer.generate_key("k", None).await.unwrap();

        let jwk = signer.public_jwk("k").await.unwrap();
        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["crv"], "P-256");
        assert!(jwk.get("d").is_none());

        let signature = signer.sign("k", b"payload").await.unwrap();
        assert_eq!(signature.len(), 64);

        let pk = p256::PublicKey::from_jwk_str(&jwk.to_string()).unwrap();
        VerifyingKey::from(pk)
            .verify(b"payload", &Signature::from_slice(&signature).unwrap())
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_alias_is_rejected() {
        let signer = P256Signer::new();
        assert!(signer.sign("missing", b"payload").await.is_err());
        assert!(signer.attestation_chain("missing").await.is_err());
    }
}
