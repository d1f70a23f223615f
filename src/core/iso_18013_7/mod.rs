//! ISO/IEC 18013-7 Annex B: mdoc presentation over OpenID4VP.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use ciborium::Value as Cbor;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

use crate::core::iso_18013_5::cbor_to_bytes;

/// Identifier of the redirect-based handover (OpenID4VP 1.0 §B.2.6.1).
pub const HANDOVER_TYPE_IDENTIFIER: &str = "OpenID4VPHandover";

/// `OpenID4VPHandover = ["OpenID4VPHandover", sha256(OpenID4VPHandoverInfoBytes)]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(String, serde_bytes::ByteBuf)", into = "(String, serde_bytes::ByteBuf)")]
pub struct Handover {
    info_hash: Vec<u8>,
}

impl Handover {
    /// `jwk_thumbprint` is the RFC 7638 thumbprint of the verifier's encryption key, when the
    /// response is encrypted.
    pub fn new(
        client_id: &str,
        nonce: &str,
        jwk_thumbprint: Option<&[u8]>,
        response_uri: &str,
    ) -> Result<Self> {
        let info = Cbor::Array(vec![
            Cbor::Text(client_id.into()),
            Cbor::Text(nonce.into()),
            jwk_thumbprint.map_or(Cbor::Null, |t| Cbor::Bytes(t.to_vec())),
            Cbor::Text(response_uri.into()),
        ]);
        let info = cbor_to_bytes(&info).context("failed to encode OpenID4VPHandoverInfo")?;

        Ok(Self {
            info_hash: Sha256::digest(info).to_vec(),
        })
    }

    pub fn info_hash(&self) -> &[u8] {
        &self.info_hash
    }
}

impl TryFrom<(String, serde_bytes::ByteBuf)> for Handover {
    type Error = String;

    fn try_from((identifier, hash): (String, serde_bytes::ByteBuf)) -> Result<Self, String> {
        if identifier != HANDOVER_TYPE_IDENTIFIER {
            return Err(format!(
                "expected '{HANDOVER_TYPE_IDENTIFIER}', found '{identifier}'"
            ));
        }
        Ok(Self {
            info_hash: hash.into_vec(),
        })
    }
}

impl From<Handover> for (String, serde_bytes::ByteBuf) {
    fn from(handover: Handover) -> Self {
        (
            HANDOVER_TYPE_IDENTIFIER.to_string(),
            serde_bytes::ByteBuf::from(handover.info_hash),
        )
    }
}

/// `SessionTranscript = [null, null, OpenID4VPHandover]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTranscript((), (), Handover);

impl SessionTranscript {
    pub fn new(handover: Handover) -> Self {
        Self((), (), handover)
    }

    pub fn handover(&self) -> &Handover {
        &self.2
    }

    pub fn to_cbor_bytes(&self) -> Result<Vec<u8>> {
        cbor_to_bytes(self).context("failed to encode SessionTranscript")
    }
}

/// Encodes the `SessionTranscript` an mdoc presentation to `response_uri` is bound to.
///
/// `ephemeral_jwk` is the verifier key the response is encrypted to, if any.
pub fn build_session_transcript(
    client_id: &str,
    nonce: &str,
    ephemeral_jwk: Option<&Json>,
    response_uri: &str,
) -> Result<Vec<u8>> {
    let thumbprint = ephemeral_jwk.map(compute_jwk_thumbprint).transpose()?;
    let handover = Handover::new(
        client_id,
        nonce,
        thumbprint.as_ref().map(|t| t.as_slice()),
        response_uri,
    )?;
    SessionTranscript::new(handover).to_cbor_bytes()
}

/// RFC 7638 SHA-256 thumbprint of an EC or RSA JWK.
pub fn compute_jwk_thumbprint(jwk: &Json) -> Result<[u8; 32]> {
    let member = |name: &str| {
        jwk.get(name)
            .and_then(Json::as_str)
            .with_context(|| format!("JWK is missing '{name}'"))
    };

    let required: BTreeMap<&str, &str> = match member("kty")? {
        "EC" => BTreeMap::from([
            ("crv", member("crv")?),
            ("kty", "EC"),
            ("x", member("x")?),
            ("y", member("y")?),
        ]),
        "RSA" => BTreeMap::from([("e", member("e")?), ("kty", "RSA"), ("n", member("n")?)]),
        kty => bail!("unsupported key type for JWK thumbprint: {kty}"),
    };

    Ok(Sha256::digest(serde_json::to_vec(&required)?).into())
}
