//! Compact JWS helpers shared by the proof builder, the SD-JWT engine, attestation issuance and
//! request object verification.

use anyhow::{bail, Context, Result};
use base64::prelude::*;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};
use tracing::debug;
use url::Url;
use x509_cert::{
    der::{referenced::OwnedToRef, Decode},
    Certificate,
};

use crate::core::{
    authorization_request::verification::verifier::Verifier,
    signer::WalletSigner,
    util::{self, AsyncHttpClient},
};
use crate::Error;

/// Length of a raw ES256 `r || s` signature.
pub const ES256_SIGNATURE_LEN: usize = 64;

pub fn split_jws(jwt: &str) -> Result<(&str, &str, &str)> {
    let mut parts = jwt.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("jwt does not have three segments")
    };
    Ok((header, payload, signature))
}

pub fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .context("jwt segment was not valid base64url")?;
    serde_json::from_slice(&bytes).context("jwt segment was not valid json")
}

/// Decodes the header and claims of a JWT without verifying its signature.
pub fn decode_unverified(jwt: &str) -> Result<(Map<String, Json>, Map<String, Json>)> {
    let (header, payload, _) = split_jws(jwt)?;
    Ok((decode_segment(header)?, decode_segment(payload)?))
}

/// Returns the leaf of the `x5c` header chain, both DER encoded and parsed.
pub fn x5c_leaf(header: &Map<String, Json>) -> Result<(Vec<u8>, Certificate)> {
    let Json::Array(x5chain) = header.get("x5c").context("'x5c' was missing from jwt headers")?
    else {
        bail!("'x5c' header was not an array")
    };

    let Json::String(b64_x509) = x5chain.first().context("'x5c' was an empty array")? else {
        bail!("'x5c' header was not an array of strings");
    };

    let leaf_cert_der = BASE64_STANDARD_NO_PAD
        .decode(b64_x509.trim_end_matches('='))
        .context("leaf certificate in 'x5c' was not valid base64")?;

    let leaf_cert = Certificate::from_der(&leaf_cert_der)
        .context("leaf certificate in 'x5c' was not valid DER")?;

    Ok((leaf_cert_der, leaf_cert))
}

/// The `alg` header of a JWT.
pub fn algorithm(header: &Map<String, Json>) -> Result<String> {
    let Json::String(alg) = header
        .get("alg")
        .context("'alg' was missing from jwt headers")?
    else {
        bail!("'alg' header was not a string")
    };
    Ok(alg.clone())
}

/// Verifies the signature of `jwt` with `verifier`.
pub fn verify_signature<V: Verifier>(verifier: &V, jwt: &str) -> Result<()> {
    let (header_b64, body_b64, sig_b64) = split_jws(jwt)?;
    let payload = [header_b64.as_bytes(), b".", body_b64.as_bytes()].concat();
    let signature = BASE64_URL_SAFE_NO_PAD
        .decode(sig_b64)
        .context("could not decode base64url encoded jwt signature")?;
    verifier
        .verify(&payload, &signature)
        .context("jwt signature could not be verified")
}

/// Builds a verifier from the public key of the `x5c` leaf certificate.
pub fn leaf_verifier<V: Verifier>(leaf: &Certificate, alg: String) -> Result<V> {
    V::from_spki(
        leaf.tbs_certificate
            .subject_public_key_info
            .owned_to_ref(),
        alg,
    )
    .context("unable to parse SPKI")
}

/// Normalizes an ES256 signature to the raw 64 byte `r || s` form.
///
/// Signers backed by platform key stores commonly produce ASN.1 DER.
pub fn raw_signature(signature: Vec<u8>) -> Result<Vec<u8>> {
    if signature.len() == ES256_SIGNATURE_LEN {
        return Ok(signature);
    }
    let signature = p256::ecdsa::Signature::from_der(&signature)
        .context("signature is neither raw r||s nor ASN.1 DER")?;
    Ok(signature.to_bytes().to_vec())
}

/// Signs `header` and `claims` as a compact JWS with the key `alias`.
///
/// Signer failures are reported as [Error::Signing].
pub async fn sign(
    signer: &(impl WalletSigner + ?Sized),
    alias: &str,
    header: &Json,
    claims: &Json,
) -> Result<String, Error> {
    let header_b64 = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(header)?);
    let payload_b64 = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = signer
        .sign(alias, signing_input.as_bytes())
        .await
        .map_err(Error::signing)?;
    let signature = raw_signature(signature).map_err(Error::signing)?;

    Ok(format!(
        "{signing_input}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Fetches a JWKS document and returns its keys.
pub async fn fetch_jwks(
    http_client: &(impl AsyncHttpClient + ?Sized),
    jwks_uri: &Url,
) -> Result<Vec<Map<String, Json>>, Error> {
    let response = util::send(http_client, util::get(jwks_uri)?).await?;
    if !response.status().is_success() {
        return Err(Error::Http(format!(
            "jwks endpoint returned {}: {}",
            response.status(),
            util::body_text(&response)
        )));
    }

    #[derive(serde::Deserialize)]
    struct Jwks {
        keys: Vec<Map<String, Json>>,
    }

    let jwks: Jwks = serde_json::from_slice(response.body())?;
    debug!("fetched {} keys from {jwks_uri}", jwks.keys.len());
    Ok(jwks.keys)
}

/// JWKS entries eligible to verify a JWT: those matching `kid` when given, otherwise every
/// EC P-256 key.
pub fn candidate_jwks<'a>(
    keys: &'a [Map<String, Json>],
    kid: Option<&'a str>,
) -> impl Iterator<Item = &'a Map<String, Json>> {
    keys.iter().filter(move |key| match kid {
        Some(kid) => key.get("kid").and_then(Json::as_str) == Some(kid),
        None => {
            key.get("kty").and_then(Json::as_str) == Some("EC")
                && key.get("crv").and_then(Json::as_str) == Some("P-256")
        }
    })
}

/// Selects the JWKS entry to verify against: the first of [candidate_jwks].
pub fn select_jwk<'a>(
    keys: &'a [Map<String, Json>],
    kid: Option<&'a str>,
) -> Option<&'a Map<String, Json>> {
    candidate_jwks(keys, kid).next()
}
