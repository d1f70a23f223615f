//! Wallet instance (WIA) and wallet unit (WUA) attestations issued by the wallet provider.

use anyhow::Context;
use base64::prelude::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{KeyAliases, WalletProviderConfig},
    core::{
        authorization_request::verification::verifier::{P256Verifier, Verifier},
        jwt,
        proof::{self, ProofClaims, ProofPurpose},
        signer::WalletSigner,
        storage::Storage,
        util::{self, AsyncHttpClient},
    },
    wallet::Wallet,
    Error, Result,
};

pub const CLIENT_ATTESTATION_HEADER: &str = "OAuth-Client-Attestation";
pub const CLIENT_ATTESTATION_POP_HEADER: &str = "OAuth-Client-Attestation-PoP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationKind {
    /// Wallet instance attestation, vouching for the wallet software.
    Wia,
    /// Wallet unit attestation, vouching for a hardware backed key.
    Wua,
}

impl AttestationKind {
    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::Wia => "attestation:wia",
            Self::Wua => "attestation:wua",
        }
    }

    pub fn proof_purpose(&self) -> ProofPurpose {
        match self {
            Self::Wia => ProofPurpose::WiaProof,
            Self::Wua => ProofPurpose::WuaProof,
        }
    }

    pub fn key_alias<'a>(&self, keys: &'a KeyAliases) -> &'a str {
        match self {
            Self::Wia => &keys.wia,
            Self::Wua => &keys.wua,
        }
    }

    fn endpoint(&self, provider: &WalletProviderConfig) -> Result<Url> {
        let endpoint = match self {
            Self::Wia => provider.wia_endpoint(),
            Self::Wua => provider.wua_endpoint(),
        };
        endpoint.map_err(Error::format)
    }
}

/// A verified attestation as persisted by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttestation {
    pub id: String,
    pub jwt: String,
    pub kind: AttestationKind,
}

impl StoredAttestation {
    pub fn is_valid(&self) -> bool {
        is_valid(&self.jwt)
    }
}

/// Whether the `exp` of `jwt` is still in the future. No clock skew is tolerated.
pub fn is_valid(jwt: &str) -> bool {
    is_valid_at(jwt, Utc::now().timestamp())
}

/// Like [is_valid], at the unix time `now`.
pub fn is_valid_at(jwt: &str, now: i64) -> bool {
    let claims = match jwt::decode_unverified(jwt) {
        Ok((_, claims)) => claims,
        Err(e) => {
            warn!("attestation could not be decoded: {e:#}");
            return false;
        }
    };
    match claims
        .get("exp")
        .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64)))
    {
        Some(exp) => exp > now,
        None => {
            debug!("attestation has no 'exp'");
            false
        }
    }
}

#[derive(Deserialize)]
struct ProviderNonce {
    #[serde(alias = "c_nonce")]
    nonce: String,
}

#[derive(Serialize)]
struct AttestationRequest<'a> {
    proof: &'a str,
    /// Key attestation chain of the attested key, leaf first, base64 DER.
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate_chain: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct AttestationResponse {
    #[serde(alias = "wallet_attestation", alias = "credential")]
    attestation: String,
}

impl<H, W, S> Wallet<H, W, S>
where
    H: AsyncHttpClient,
    W: WalletSigner,
    S: Storage,
{
    /// Obtains a fresh attestation of `kind` from the wallet provider and persists it.
    ///
    /// The key of a WUA is generated anew with the provider nonce as its attestation challenge.
    /// The key of a WIA must already exist in the signer. An attestation whose signature does not
    /// verify against the provider's JWKS is discarded.
    pub async fn request_attestation(&self, kind: AttestationKind) -> Result<StoredAttestation> {
        let config = self.config();
        let provider = &config.wallet_provider;
        let key_alias = kind.key_alias(&config.keys);

        let nonce = self.provider_nonce(provider).await?;

        let certificate_chain = match kind {
            AttestationKind::Wia => None,
            AttestationKind::Wua => {
                self.signer()
                    .generate_key(key_alias, Some(nonce.as_bytes()))
                    .await
                    .map_err(Error::signing)?;
                let chain = self
                    .signer()
                    .attestation_chain(key_alias)
                    .await
                    .map_err(Error::signing)?;
                Some(
                    chain
                        .iter()
                        .map(|der| BASE64_STANDARD.encode(der))
                        .collect(),
                )
            }
        };

        let proof = proof::build(
            self.signer(),
            kind.proof_purpose(),
            key_alias,
            ProofClaims::new(
                Some(config.client_id.clone()),
                provider.base.as_str().trim_end_matches('/'),
            ),
            Some(&nonce),
        )
        .await?;

        let endpoint = kind.endpoint(provider)?;
        let request = util::post_json(
            &endpoint,
            &AttestationRequest {
                proof: &proof,
                certificate_chain,
            },
            &[],
        )?;
        let response = util::send(self.http_client(), request).await?;
        let status = response.status();
        let body = util::body_text(&response);
        if !status.is_success() {
            return Err(Error::Issuance {
                status: status.as_u16(),
                body,
            });
        }

        let jwt = match serde_json::from_str::<AttestationResponse>(&body) {
            Ok(response) => response.attestation,
            Err(_) => body.trim().to_string(),
        };

        let jwks_uri = provider.jwks_endpoint().map_err(Error::format)?;
        verify_attestation(self.http_client(), &jwks_uri, &jwt).await?;
        self.check_key_binding(&jwt, key_alias).await?;

        let (_, claims) = jwt::decode_unverified(&jwt)?;
        let id = claims
            .get("jti")
            .and_then(Json::as_str)
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let attestation = StoredAttestation { id, jwt, kind };
        self.store().put_attestation(&attestation).await?;
        info!("stored {kind:?} attestation '{}'", attestation.id);
        Ok(attestation)
    }

    /// The stored WIA as OAuth client attestation headers for a request to `audience`.
    pub async fn client_attestation(
        &self,
        audience: &str,
        nonce: Option<&str>,
    ) -> Result<[(&'static str, String); 2]> {
        let wia = self
            .store()
            .attestation(AttestationKind::Wia)
            .await?
            .ok_or_else(|| Error::State("no wallet instance attestation is stored".into()))?;
        client_attestation_headers(
            &wia,
            self.signer(),
            AttestationKind::Wia.key_alias(&self.config().keys),
            audience,
            nonce,
        )
        .await
    }

    async fn provider_nonce(&self, provider: &WalletProviderConfig) -> Result<String> {
        let endpoint = provider.nonce_endpoint().map_err(Error::format)?;
        let response = util::send(self.http_client(), util::get(&endpoint)?).await?;
        if !response.status().is_success() {
            return Err(Error::Issuance {
                status: response.status().as_u16(),
                body: util::body_text(&response),
            });
        }
        let ProviderNonce { nonce } = serde_json::from_slice(response.body())?;
        Ok(nonce)
    }

    /// Checks that the attestation's `cnf.jwk`, when present, is the key under `key_alias`.
    async fn check_key_binding(&self, attestation: &str, key_alias: &str) -> Result<()> {
        let (_, claims) = jwt::decode_unverified(attestation)?;
        let Some(attested) = claims.get("cnf").and_then(|cnf| cnf.get("jwk")) else {
            warn!("attestation has no 'cnf.jwk', key binding not checked");
            return Ok(());
        };

        let own = self
            .signer()
            .public_jwk(key_alias)
            .await
            .map_err(Error::signing)?;
        let attested = P256Verifier::from_jwk(attested, proof::ES256.into())
            .map_err(Error::security)?;
        let own = P256Verifier::from_jwk(&own, proof::ES256.into()).map_err(Error::signing)?;
        if attested != own {
            return Err(Error::Security(format!(
                "attestation is bound to a different key than '{key_alias}'"
            )));
        }
        Ok(())
    }
}

/// Verifies the signature of an attestation against the wallet provider's JWKS.
async fn verify_attestation(
    http_client: &(impl AsyncHttpClient + ?Sized),
    jwks_uri: &Url,
    attestation: &str,
) -> Result<()> {
    let (header, _) = jwt::decode_unverified(attestation)?;
    let alg = jwt::algorithm(&header)?;
    let keys = jwt::fetch_jwks(http_client, jwks_uri).await?;

    let kid = header.get("kid").and_then(Json::as_str);
    let jwk = jwt::select_jwk(&keys, kid).ok_or_else(|| {
        Error::Security(format!(
            "no wallet provider key (kid: {kid:?}) in {jwks_uri}"
        ))
    })?;

    let verifier =
        P256Verifier::from_jwk(&Json::Object(jwk.clone()), alg).map_err(Error::security)?;
    jwt::verify_signature(&verifier, attestation)
        .map_err(|e| Error::security(e.context("attestation signature could not be verified")))
}

/// Builds the `OAuth-Client-Attestation` and `OAuth-Client-Attestation-PoP` headers for a
/// request to `audience`.
///
/// The PoP is issued by the client the WIA was issued to (its `sub`) and signed with the
/// attested key.
pub async fn client_attestation_headers(
    wia: &StoredAttestation,
    signer: &(impl WalletSigner + ?Sized),
    key_alias: &str,
    audience: &str,
    nonce: Option<&str>,
) -> Result<[(&'static str, String); 2]> {
    if wia.kind != AttestationKind::Wia {
        return Err(Error::State(format!(
            "a {:?} attestation cannot authenticate the client",
            wia.kind
        )));
    }
    if !wia.is_valid() {
        return Err(Error::State("the wallet instance attestation has expired".into()));
    }

    let (_, claims) = jwt::decode_unverified(&wia.jwt)?;
    let client_id = claims
        .get("sub")
        .and_then(Json::as_str)
        .context("wallet instance attestation has no 'sub'")
        .map_err(|e| Error::Claim(format!("{e:#}")))?;

    let pop = proof::build(
        signer,
        ProofPurpose::ClientAttestationPop,
        key_alias,
        ProofClaims::new(Some(client_id.to_string()), audience)
            .with("jti", uuid::Uuid::new_v4().to_string()),
        nonce,
    )
    .await?;

    Ok([
        (CLIENT_ATTESTATION_HEADER, wia.jwt.clone()),
        (CLIENT_ATTESTATION_POP_HEADER, pop),
    ])
}
