//! Encrypted authorization responses for the `direct_post.jwt` response mode (OID4VP 1.0 §8.3).

use anyhow::{bail, Context, Result};
use josekit::{
    jwe::{alg::ecdh_es::EcdhEsJweEncrypter, JweHeader, ECDH_ES},
    jwk::Jwk,
    jwt::{encode_with_encrypter, JwtPayload},
};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::core::authorization_request::AuthorizationRequestObject;

/// Key agreement algorithm supported for response encryption.
pub const ECDH_ES_ALG: &str = "ECDH-ES";

/// A verifier key suitable for encrypting a response.
#[derive(Debug, Clone)]
pub struct EncryptionJwk {
    /// The JWK as published by the verifier.
    pub jwk: Json,
    pub alg: String,
    pub kid: Option<String>,
}

/// Finds the first P-256 `ECDH-ES` key in `keys` that may be used for encryption.
///
/// Keys without `alg` are skipped; keys without `use` are accepted.
pub fn find_encryption_jwk<'a, I>(keys: I) -> Result<EncryptionJwk>
where
    I: IntoIterator<Item = &'a Map<String, Json>>,
{
    for key in keys {
        let member = |name: &str| key.get(name).and_then(Json::as_str);

        match (member("alg"), member("crv"), member("use")) {
            (Some(ECDH_ES_ALG), Some("P-256"), Some("enc") | None) => {
                if member("use").is_none() {
                    warn!("JWK missing 'use' parameter, assuming it can be used for encryption");
                }
                return Ok(EncryptionJwk {
                    jwk: Json::Object(key.clone()),
                    alg: ECDH_ES_ALG.to_string(),
                    kid: member("kid").map(String::from),
                });
            }
            (alg, crv, key_use) => {
                debug!("skipping JWK (alg: {alg:?}, crv: {crv:?}, use: {key_use:?})")
            }
        }
    }

    bail!("no suitable encryption key found in JWKS (requires P-256 key with alg='ECDH-ES' and use='enc')")
}

/// The verifier key a response to `request` is encrypted to.
pub fn encryption_jwk(request: &AuthorizationRequestObject) -> Result<EncryptionJwk> {
    let jwks = request
        .client_metadata()
        .context("'client_metadata' is required for an encrypted response")?
        .jwks()?;
    find_encryption_jwk(&jwks.keys)
}

/// Encrypts `payload` as a JWT to `recipient` with ECDH-ES key agreement and content encryption
/// `enc`.
pub fn encrypt(payload: Map<String, Json>, recipient: &EncryptionJwk, enc: &str) -> Result<String> {
    if recipient.alg != ECDH_ES_ALG {
        bail!("unsupported algorithm: {} (only ECDH-ES is supported)", recipient.alg);
    }

    let jwk = Jwk::from_bytes(serde_json::to_vec(&recipient.jwk)?).context("invalid recipient JWK")?;

    let mut jwt_payload = JwtPayload::new();
    for (key, value) in payload {
        jwt_payload.set_claim(&key, Some(value))?;
    }

    let mut header = JweHeader::new();
    header.set_token_type("JWT");
    header.set_algorithm(&recipient.alg);
    header.set_content_encryption(enc);
    if let Some(kid) = &recipient.kid {
        header.set_key_id(kid);
    }

    let encrypter: EcdhEsJweEncrypter = ECDH_ES.encrypter_from_jwk(&jwk)?;
    Ok(encode_with_encrypter(&jwt_payload, &header, &encrypter)?)
}

/// Encrypts the response `payload` for `request`, using the content encryption the verifier asked
/// for.
pub fn build_encrypted_response(
    request: &AuthorizationRequestObject,
    recipient: &EncryptionJwk,
    payload: Map<String, Json>,
) -> Result<String> {
    let enc = request
        .client_metadata()
        .context("'client_metadata' is required for an encrypted response")?
        .response_enc();

    debug!(
        "encrypting response: alg={}, enc={enc}, kid={:?}",
        recipient.alg, recipient.kid
    );
    encrypt(payload, recipient, enc)
}
