//! Credentials held by the wallet and the format specific engines behind them.

use std::collections::BTreeMap;

use anyhow::Context;
use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::core::{
    claims::ClaimMetadataTree,
    credential_format::CredentialFormat,
    dcql_query::DcqlCredentialQuery,
    iso_18013_5::{self, ElementSelection},
    iso_18013_7,
    sd_jwt::{self, ClaimGroups, SdJwt},
    signer::WalletSigner,
};
use crate::{Error, Result};

/// A credential as persisted by the [CredentialStore](crate::store::CredentialStore).
///
/// `raw_credential` is the compact SD-JWT, or the base64url encoded `IssuerSigned` structure of an
/// mdoc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub raw_credential: String,
    pub format: CredentialFormat,
    #[serde(default)]
    pub claims_metadata: ClaimMetadataTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_metadata: Option<Json>,
    /// Alias of the signer key the credential is bound to.
    pub key_alias: String,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Claims of a credential, flattened one level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedClaims {
    pub claims: BTreeMap<String, Json>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a presentation is bound to.
#[derive(Debug, Clone, Copy)]
pub struct PresentationContext<'a> {
    pub client_id: &'a str,
    pub nonce: &'a str,
    pub response_uri: &'a str,
    /// Verifier key the response will be encrypted to, if any.
    pub encryption_jwk: Option<&'a Json>,
    pub claims_metadata: &'a ClaimMetadataTree,
    pub claim_groups: &'a ClaimGroups,
}

/// A credential in one of the supported formats.
#[derive(Debug, Clone)]
pub enum Credential {
    SdJwt(SdJwt),
    /// Encoded `IssuerSigned`.
    Mdoc(Vec<u8>),
}

impl Credential {
    pub fn parse(format: &CredentialFormat, raw_credential: &str) -> Result<Self> {
        match format {
            f if f.is_sd_jwt() => Ok(Self::SdJwt(SdJwt::parse(raw_credential)?)),
            CredentialFormat::MsoMdoc => {
                let bytes = BASE64_URL_SAFE_NO_PAD
                    .decode(raw_credential.trim().trim_end_matches('='))
                    .context("mdoc credential is not base64url encoded")?;
                Ok(Self::Mdoc(bytes))
            }
            other => Err(Error::Format(format!("unsupported credential format '{other}'"))),
        }
    }

    pub fn from_stored(stored: &StoredCredential) -> Result<Self> {
        Self::parse(&stored.format, &stored.raw_credential)
    }

    pub fn format(&self) -> CredentialFormat {
        match self {
            Self::SdJwt(_) => CredentialFormat::DcSdJwt,
            Self::Mdoc(_) => CredentialFormat::MsoMdoc,
        }
    }

    /// The `vct` of an SD-JWT VC or the document type of an mdoc.
    pub fn type_identifier(&self) -> Result<String> {
        match self {
            Self::SdJwt(sd_jwt) => sd_jwt
                .issuer_claims()?
                .get("vct")
                .and_then(Json::as_str)
                .map(String::from)
                .ok_or_else(|| Error::Format("sd-jwt has no 'vct' claim".into())),
            Self::Mdoc(issuer_signed) => {
                Ok(iso_18013_5::decode_credential_claims(issuer_signed)?.doc_type)
            }
        }
    }

    pub fn decode_claims(&self) -> Result<DecodedClaims> {
        match self {
            Self::SdJwt(sd_jwt) => {
                let issuer_claims = sd_jwt.issuer_claims()?;
                let timestamp = |name: &str| {
                    issuer_claims
                        .get(name)
                        .and_then(Json::as_i64)
                        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                };
                Ok(DecodedClaims {
                    claims: sd_jwt::decode(&sd_jwt.serialize_with(sd_jwt.disclosures()))?,
                    issued_at: timestamp("iat"),
                    expires_at: timestamp("exp"),
                })
            }
            Self::Mdoc(issuer_signed) => {
                let decoded = iso_18013_5::decode_credential_claims(issuer_signed)?;
                Ok(DecodedClaims {
                    claims: decoded.claims,
                    issued_at: decoded.issued_at,
                    expires_at: decoded.expires_at,
                })
            }
        }
    }

    /// Whether this credential can answer `query`: the format must match, as must `vct_values`
    /// or `doctype_value` when the query constrains them.
    pub fn satisfies(&self, query: &DcqlCredentialQuery) -> Result<bool> {
        if !self.format().satisfies(query.format()) {
            return Ok(false);
        }
        let type_identifier = self.type_identifier()?;
        Ok(match self {
            Self::SdJwt(_) => query
                .vct_values()
                .map_or(true, |values| values.contains(&type_identifier.as_str())),
            Self::Mdoc(_) => query
                .doctype_value()
                .map_or(true, |doctype| doctype == type_identifier),
        })
    }

    /// Builds the presentation of this credential answering `query`, as it appears in the
    /// `vp_token`.
    ///
    /// SD-JWTs are presented with the selected disclosures and a key binding JWT. mdocs are
    /// presented as a base64url encoded `DeviceResponse` bound to the OpenID4VP session
    /// transcript.
    pub async fn build_presentation(
        &self,
        query: &DcqlCredentialQuery,
        context: &PresentationContext<'_>,
        signer: &(impl WalletSigner + ?Sized),
        key_alias: &str,
    ) -> Result<String> {
        match self {
            Self::SdJwt(sd_jwt) => {
                let disclosures = sd_jwt::resolve_requested_claims(
                    query,
                    sd_jwt,
                    context.claims_metadata,
                    context.claim_groups,
                )?;
                debug!("disclosing {} claims", disclosures.len());
                sd_jwt::create_presentation(
                    sd_jwt,
                    &disclosures,
                    context.client_id,
                    context.nonce,
                    signer,
                    key_alias,
                )
                .await
            }
            Self::Mdoc(issuer_signed) => {
                let selection = element_selection(query, issuer_signed)?;
                let session_transcript = iso_18013_7::build_session_transcript(
                    context.client_id,
                    context.nonce,
                    context.encryption_jwk,
                    context.response_uri,
                )?;
                let device_response = iso_18013_5::build_device_response(
                    issuer_signed,
                    &selection,
                    &session_transcript,
                    signer,
                    key_alias,
                )
                .await?;
                Ok(BASE64_URL_SAFE_NO_PAD.encode(device_response))
            }
        }
    }
}

/// The data elements requested by `query`; every element of the credential when the query names
/// no claims.
fn element_selection(query: &DcqlCredentialQuery, issuer_signed: &[u8]) -> Result<ElementSelection> {
    let requested = query.requested_claims();
    if requested.is_empty() {
        let decoded = iso_18013_5::decode_credential_claims(issuer_signed)?;
        return Ok(decoded
            .elements
            .into_iter()
            .map(|(name_space, elements)| (name_space, elements.into_keys().collect()))
            .collect());
    }

    let mut selection = ElementSelection::new();
    for claim in requested {
        let (Some(name_space), Some(element)) = (claim.namespace(), claim.element_identifier())
        else {
            return Err(Error::Format(format!(
                "mdoc claim path {:?} is not [namespace, element_identifier]",
                claim.segments()
            )));
        };
        selection
            .entry(name_space.to_string())
            .or_default()
            .insert(element.to_string());
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        iso_18013_5::test_support::{issuer_signed, MDL_DOCTYPE, MDL_NAMESPACE},
        sd_jwt::test_support,
        signer::P256Signer,
    };
    use serde_json::json;

    fn query(value: Json) -> DcqlCredentialQuery {
        serde_json::from_value(value).unwrap()
    }

    fn mdoc() -> Credential {
        let raw = BASE64_URL_SAFE_NO_PAD.encode(issuer_signed());
        Credential::parse(&CredentialFormat::MsoMdoc, &raw).unwrap()
    }

    #[test]
    fn sd_jwt_claims_and_validity_are_decoded() {
        let (_, raw) = test_support::credential();
        let credential = Credential::parse(&CredentialFormat::VcSdJwt, &raw).unwrap();

        let decoded = credential.decode_claims().unwrap();
        assert_eq!(decoded.claims["given_name"], "Erika");
        assert_eq!(decoded.claims["locality"], "Koeln");
        assert!(!decoded.claims.contains_key("address"));
        assert_eq!(decoded.expires_at.unwrap().timestamp(), 1_900_000_000);
        assert!(decoded.issued_at.is_none());
    }

    #[test]
    fn mdoc_claims_are_decoded_from_base64url() {
        let decoded = mdoc().decode_claims().unwrap();
        assert_eq!(decoded.claims["family_name"], "Mustermann");
        assert!(decoded.issued_at.is_some());
        assert!(decoded.expires_at.is_some());
    }

    #[test]
    fn query_meta_constrains_the_credential_type() {
        let (_, raw) = test_support::credential();
        let sd_jwt = Credential::parse(&CredentialFormat::DcSdJwt, &raw).unwrap();

        let pid = query(json!({
            "id": "pid", "format": "dc+sd-jwt", "meta": { "vct_values": ["urn:eudi:pid:1"] }
        }));
        let other = query(json!({
            "id": "pid", "format": "dc+sd-jwt", "meta": { "vct_values": ["urn:other:1"] }
        }));
        let mdl = query(json!({
            "id": "mdl", "format": "mso_mdoc", "meta": { "doctype_value": MDL_DOCTYPE }
        }));

        assert!(sd_jwt.satisfies(&pid).unwrap());
        assert!(!sd_jwt.satisfies(&other).unwrap());
        assert!(!sd_jwt.satisfies(&mdl).unwrap());
        assert!(mdoc().satisfies(&mdl).unwrap());
    }

    #[test]
    fn unsupported_formats_are_rejected() {
        let err = Credential::parse(&CredentialFormat::Other("ldp_vc".into()), "{}").unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn mdoc_selection_follows_claim_paths() {
        let raw = issuer_signed();
        let query = query(json!({
            "id": "mdl",
            "format": "mso_mdoc",
            "claims": [
                { "path": [MDL_NAMESPACE, "given_name"] },
                { "path": [MDL_NAMESPACE, "birth_date"] }
            ]
        }));
        let selection = element_selection(&query, &raw).unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(
            selection[MDL_NAMESPACE].iter().collect::<Vec<_>>(),
            ["birth_date", "given_name"]
        );
    }

    #[test]
    fn mdoc_selection_without_claims_takes_everything() {
        let raw = issuer_signed();
        let query = query(json!({ "id": "mdl", "format": "mso_mdoc" }));
        let selection = element_selection(&query, &raw).unwrap();
        assert_eq!(selection.len(), 2);
    }

    #[tokio::test]
    async fn mdoc_presentation_is_a_base64url_device_response() {
        let signer = P256Signer::new();
        signer
            .insert("device", p256::ecdsa::SigningKey::from_slice(&[5u8; 32]).unwrap())
            .await;

        let query = query(json!({
            "id": "mdl",
            "format": "mso_mdoc",
            "claims": [{ "path": [MDL_NAMESPACE, "family_name"] }]
        }));
        let context = PresentationContext {
            client_id: "x509_hash:abc",
            nonce: "n-0S6",
            response_uri: "https://verifier.example/response",
            encryption_jwk: None,
            claims_metadata: &ClaimMetadataTree::default(),
            claim_groups: &ClaimGroups::default(),
        };

        let vp = mdoc()
            .build_presentation(&query, &context, &signer, "device")
            .await
            .unwrap();
        let device_response = BASE64_URL_SAFE_NO_PAD.decode(vp).unwrap();
        let decoded = iso_18013_5::decode_credential_claims(&device_response).unwrap();
        assert_eq!(
            decoded.claims.keys().collect::<Vec<_>>(),
            ["family_name"]
        );
    }
}
