//! Proof-of-possession JWTs.
//!
//! Every JWT the wallet signs with one of its own keys is built here: OpenID4VCI key proofs,
//! wallet instance and wallet unit attestation proofs, DPoP proofs, SD-JWT key binding JWTs and
//! OAuth client attestation PoPs. All of them are ES256 with a raw `r || s` signature.

use base64::prelude::*;
use serde_json::{Map, Value as Json};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::{jwt, signer::WalletSigner};
use crate::{Error, Result};

/// Validity window of proofs that carry an `exp` claim, in seconds.
pub const PROOF_LIFETIME_SECS: i64 = 300;

pub const ES256: &str = "ES256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofPurpose {
    /// Key proof sent with an OpenID4VCI credential request.
    VciProof,
    /// Proof sent to the wallet provider to obtain a wallet instance attestation.
    WiaProof,
    /// Proof sent to the wallet provider to obtain a wallet unit attestation.
    WuaProof,
    /// RFC 9449 proof bound to a single HTTP request.
    Dpop,
    /// SD-JWT key binding JWT.
    KeyBinding,
    /// PoP accompanying a wallet attestation used for OAuth client authentication. The key is
    /// conveyed by the attestation's `cnf` claim, never in the header.
    ClientAttestationPop,
}

impl ProofPurpose {
    pub fn typ(&self) -> &'static str {
        match self {
            Self::VciProof | Self::WiaProof | Self::WuaProof => "openid4vci-proof+jwt",
            Self::Dpop => "dpop+jwt",
            Self::KeyBinding => "kb+jwt",
            Self::ClientAttestationPop => "oauth-client-attestation-pop+jwt",
        }
    }

    pub fn embeds_jwk(&self) -> bool {
        match self {
            Self::VciProof | Self::WiaProof | Self::WuaProof | Self::Dpop => true,
            Self::KeyBinding | Self::ClientAttestationPop => false,
        }
    }

    fn requires_issuer(&self) -> bool {
        matches!(
            self,
            Self::VciProof | Self::WiaProof | Self::WuaProof | Self::ClientAttestationPop
        )
    }

    fn requires_audience(&self) -> bool {
        !matches!(self, Self::Dpop)
    }

    fn expires(&self) -> bool {
        self.requires_issuer()
    }
}

/// Claims supplied by the caller of [build].
///
/// `iat`, `exp` and `nonce` are set by the builder, as are the `typ`, `alg` and `jwk` headers.
#[derive(Debug, Clone, Default)]
pub struct ProofClaims {
    pub iss: Option<String>,
    pub aud: Option<String>,
    pub additional: Map<String, Json>,
    /// Extra JOSE header members, e.g. `key_attestation`.
    pub header: Map<String, Json>,
}

impl ProofClaims {
    pub fn new(iss: Option<String>, aud: impl Into<String>) -> Self {
        Self {
            iss,
            aud: Some(aud.into()),
            ..Default::default()
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.additional.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }
}

/// Builds and signs a proof-of-possession JWT.
pub async fn build(
    signer: &(impl WalletSigner + ?Sized),
    purpose: ProofPurpose,
    key_alias: &str,
    claims: ProofClaims,
    nonce: Option<&str>,
) -> Result<String> {
    build_at(
        signer,
        purpose,
        key_alias,
        claims,
        nonce,
        chrono::Utc::now().timestamp(),
    )
    .await
}

pub(crate) async fn build_at(
    signer: &(impl WalletSigner + ?Sized),
    purpose: ProofPurpose,
    key_alias: &str,
    claims: ProofClaims,
    nonce: Option<&str>,
    now: i64,
) -> Result<String> {
    let ProofClaims {
        iss,
        aud,
        additional,
        header: extra_header,
    } = claims;

    if purpose.requires_issuer() && iss.as_deref().map_or(true, str::is_empty) {
        return Err(Error::Claim(format!("'iss' is required for {purpose:?}")));
    }
    if purpose.requires_audience() && aud.as_deref().map_or(true, str::is_empty) {
        return Err(Error::Claim(format!("'aud' is required for {purpose:?}")));
    }

    let mut header = Json::Object(extra_header);
    header["typ"] = purpose.typ().into();
    header["alg"] = ES256.into();
    if purpose.embeds_jwk() {
        let jwk = signer
            .public_jwk(key_alias)
            .await
            .map_err(Error::signing)?;
        header["jwk"] = public_members(&jwk);
    }

    let mut payload = additional;
    if let Some(iss) = iss {
        payload.insert("iss".into(), iss.into());
    }
    if let Some(aud) = aud {
        payload.insert("aud".into(), aud.into());
    }
    payload.insert("iat".into(), now.into());
    if purpose.expires() {
        payload.insert("exp".into(), (now + PROOF_LIFETIME_SECS).into());
    }
    if let Some(nonce) = nonce {
        payload.insert("nonce".into(), nonce.into());
    }

    debug!("signing {} with key '{key_alias}'", purpose.typ());
    jwt::sign(signer, key_alias, &header, &Json::Object(payload)).await
}

/// Builds a DPoP proof for one HTTP request.
///
/// `access_token` is hashed into `ath` when the request carries a DPoP-bound token; `nonce` is
/// the latest `DPoP-Nonce` handed out by the server.
pub async fn dpop(
    signer: &(impl WalletSigner + ?Sized),
    key_alias: &str,
    htm: &str,
    htu: &str,
    access_token: Option<&str>,
    nonce: Option<&str>,
) -> Result<String> {
    if htm.is_empty() || htu.is_empty() {
        return Err(Error::Claim("'htm' and 'htu' are required for DPoP".into()));
    }

    let mut claims = ProofClaims::default()
        .with("jti", uuid::Uuid::new_v4().to_string())
        .with("htm", htm)
        .with("htu", htu);
    if let Some(token) = access_token {
        claims = claims.with("ath", BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(token)));
    }

    build(signer, ProofPurpose::Dpop, key_alias, claims, nonce).await
}

/// Strips everything but the public key members from a JWK.
pub(crate) fn public_members(jwk: &Json) -> Json {
    let mut public = Map::new();
    for member in ["kty", "crv", "x", "y", "e", "n"] {
        if let Some(value) = jwk.get(member) {
            public.insert(member.into(), value.clone());
        }
    }
    Json::Object(public)
}
