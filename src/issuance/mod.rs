//! OpenID4VCI credential issuance.
//!
//! A flow runs `fetch_nonce -> create_proof -> request_credential -> persist_credential`. Each
//! step consumes the [IssuanceFlow] and returns it advanced, so the caller owns the in-progress
//! state between suspension points. The access token is obtained by the caller beforehand.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    attestation::AttestationKind,
    core::{
        claims::ClaimMetadataTree,
        credential_format::CredentialFormat,
        proof::{self, ProofClaims, ProofPurpose},
        sd_jwt,
        signer::WalletSigner,
        storage::Storage,
        util::{self, AsyncHttpClient},
    },
    credential::{Credential, StoredCredential},
    wallet::Wallet,
    Error, Result,
};

const AUTHORIZATION_HEADER: &str = "Authorization";
const DPOP_HEADER: &str = "DPoP";
const DPOP_NONCE_HEADER: &str = "DPoP-Nonce";

/// Credential issuer endpoints, as found in the issuer metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerEndpoints {
    /// The credential issuer identifier, used verbatim as proof audience.
    pub credential_issuer: String,
    pub credential_endpoint: Url,
    pub nonce_endpoint: Url,
    /// Issuer key set. SD-JWT credentials are checked against it as they are received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<Url>,
}

/// The credential configuration being requested.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialConfiguration {
    pub id: String,
    pub format: CredentialFormat,
    /// Key of the credential's storage slot: its `vct` or document type.
    pub type_key: String,
    pub claims_metadata: ClaimMetadataTree,
    pub display_metadata: Option<Json>,
}

impl CredentialConfiguration {
    /// Reads configuration `id` from `credential_configurations_supported` of the issuer
    /// metadata.
    pub fn from_issuer_metadata(id: &str, issuer_metadata: &Json) -> Result<Self> {
        let configuration = issuer_metadata
            .get("credential_configurations_supported")
            .and_then(|c| c.get(id))
            .ok_or_else(|| Error::Format(format!("unknown credential configuration '{id}'")))?;

        let format: CredentialFormat = configuration
            .get("format")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::Format(format!("configuration '{id}' has no 'format'")))?
            .into();

        let type_key = match &format {
            CredentialFormat::MsoMdoc => configuration.get("doctype"),
            _ => configuration.get("vct"),
        }
        .and_then(Json::as_str)
        .unwrap_or(id)
        .to_string();

        let display_metadata = configuration
            .get("credential_metadata")
            .and_then(|m| m.get("display"))
            .or_else(|| configuration.get("display"))
            .cloned();
        let claims = configuration
            .get("credential_metadata")
            .and_then(|m| m.get("claims"))
            .or_else(|| configuration.get("claims"))
            .unwrap_or(&Json::Null);

        Ok(Self {
            id: id.to_string(),
            format,
            type_key,
            claims_metadata: ClaimMetadataTree::from_issuer_metadata(claims)?,
            display_metadata,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
    #[serde(rename = "DPoP")]
    Dpop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: TokenType,
    /// Latest `DPoP-Nonce` handed out by the issuer.
    #[serde(default)]
    pub dpop_nonce: Option<String>,
}

/// Nonce endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceResponse {
    pub c_nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssuanceStep {
    Authorized,
    NonceReceived(NonceResponse),
    ProofCreated { proof: String },
    CredentialReceived { credential: String },
}

/// State of one issuance.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceFlow {
    pub endpoints: IssuerEndpoints,
    pub configuration: CredentialConfiguration,
    pub access_token: AccessToken,
    step: IssuanceStep,
}

impl IssuanceFlow {
    pub fn new(
        endpoints: IssuerEndpoints,
        configuration: CredentialConfiguration,
        access_token: AccessToken,
    ) -> Self {
        Self {
            endpoints,
            configuration,
            access_token,
            step: IssuanceStep::Authorized,
        }
    }

    pub fn step(&self) -> &IssuanceStep {
        &self.step
    }

    fn unexpected(&self, operation: &str) -> Error {
        Error::State(format!("cannot {operation} in step {:?}", self.step))
    }
}

#[derive(Serialize)]
struct CredentialRequest<'a> {
    credential_configuration_id: &'a str,
    format: &'a CredentialFormat,
    proof: Json,
}

#[derive(Deserialize)]
struct CredentialResponse {
    #[serde(default)]
    credential: Option<Json>,
    #[serde(default)]
    credentials: Option<Vec<CredentialObject>>,
}

#[derive(Deserialize)]
struct CredentialObject {
    credential: Json,
}

impl CredentialResponse {
    fn into_credential(self) -> Option<String> {
        let credential = match (self.credential, self.credentials) {
            (Some(credential), _) => credential,
            (None, Some(credentials)) => credentials.into_iter().next()?.credential,
            (None, None) => return None,
        };
        credential.as_str().map(String::from)
    }
}

impl<H, W, S> Wallet<H, W, S>
where
    H: AsyncHttpClient,
    W: WalletSigner,
    S: Storage,
{
    /// Runs every remaining step of `flow`.
    pub async fn issue_credential(&self, mut flow: IssuanceFlow) -> Result<StoredCredential> {
        if flow.step == IssuanceStep::Authorized {
            flow = self.fetch_nonce(flow).await?;
        }
        if matches!(flow.step, IssuanceStep::NonceReceived(_)) {
            flow = self.create_proof(flow).await?;
        }
        if matches!(flow.step, IssuanceStep::ProofCreated { .. }) {
            flow = self.request_credential(flow).await?;
        }
        self.persist_credential(flow).await
    }

    pub async fn fetch_nonce(&self, mut flow: IssuanceFlow) -> Result<IssuanceFlow> {
        if flow.step != IssuanceStep::Authorized {
            return Err(flow.unexpected("fetch a nonce"));
        }

        let request = util::base_request()
            .method(http::Method::POST)
            .uri(flow.endpoints.nonce_endpoint.as_str())
            .body(vec![])
            .map_err(Error::http)?;
        let response = util::send(self.http_client(), request).await?;
        if !response.status().is_success() {
            return Err(Error::Issuance {
                status: response.status().as_u16(),
                body: util::body_text(&response),
            });
        }

        let nonce: NonceResponse = serde_json::from_slice(response.body())?;
        debug!("received c_nonce (expires_in: {:?})", nonce.expires_in);
        flow.step = IssuanceStep::NonceReceived(nonce);
        Ok(flow)
    }

    /// Builds the key proof, bound to the stored wallet unit attestation.
    pub async fn create_proof(&self, mut flow: IssuanceFlow) -> Result<IssuanceFlow> {
        let IssuanceStep::NonceReceived(nonce) = &flow.step else {
            return Err(flow.unexpected("create a proof"));
        };

        let wua = self
            .store()
            .attestation(AttestationKind::Wua)
            .await?
            .ok_or_else(|| Error::State("no wallet unit attestation is stored".into()))?;
        if !wua.is_valid() {
            self.store()
                .delete_attestation(AttestationKind::Wua)
                .await?;
            return Err(Error::State(
                "the wallet unit attestation has expired".into(),
            ));
        }

        let config = self.config();
        let proof = proof::build(
            self.signer(),
            ProofPurpose::VciProof,
            &config.keys.credential,
            ProofClaims::new(
                Some(config.client_id.clone()),
                flow.endpoints.credential_issuer.clone(),
            )
            .with_header("key_attestation", wua.jwt),
            Some(&nonce.c_nonce),
        )
        .await?;

        flow.step = IssuanceStep::ProofCreated { proof };
        Ok(flow)
    }

    pub async fn request_credential(&self, mut flow: IssuanceFlow) -> Result<IssuanceFlow> {
        let IssuanceStep::ProofCreated { proof: key_proof } = &flow.step else {
            return Err(flow.unexpected("request a credential"));
        };

        let endpoint = &flow.endpoints.credential_endpoint;
        let token = &flow.access_token;
        let mut headers = vec![];
        match token.token_type {
            TokenType::Bearer => headers.push((
                AUTHORIZATION_HEADER,
                format!("Bearer {}", token.access_token),
            )),
            TokenType::Dpop => {
                let dpop = proof::dpop(
                    self.signer(),
                    &self.config().keys.credential,
                    http::Method::POST.as_str(),
                    endpoint.as_str(),
                    Some(&token.access_token),
                    token.dpop_nonce.as_deref(),
                )
                .await?;
                headers.push((
                    AUTHORIZATION_HEADER,
                    format!("DPoP {}", token.access_token),
                ));
                headers.push((DPOP_HEADER, dpop));
            }
        }

        let body = CredentialRequest {
            credential_configuration_id: &flow.configuration.id,
            format: &flow.configuration.format,
            proof: json!({ "proof_type": "jwt", "jwt": key_proof }),
        };
        let response = util::send(
            self.http_client(),
            util::post_json(endpoint, &body, &headers)?,
        )
        .await?;

        if let Some(nonce) = response
            .headers()
            .get(DPOP_NONCE_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            flow.access_token.dpop_nonce = Some(nonce.to_string());
        }

        let status = response.status();
        let body = util::body_text(&response);
        if requires_reauthentication(status, &body) {
            warn!("access token rejected by the credential endpoint ({status})");
            return Err(Error::ReauthenticationRequired { body });
        }
        if !status.is_success() {
            return Err(Error::Issuance {
                status: status.as_u16(),
                body,
            });
        }

        let response: CredentialResponse = serde_json::from_str(&body)?;
        let credential = response
            .into_credential()
            .ok_or_else(|| Error::Format("credential response has no credential".into()))?;

        if flow.configuration.format.is_sd_jwt() {
            match &flow.endpoints.jwks_uri {
                Some(jwks_uri) => {
                    sd_jwt::verify(&credential, jwks_uri, self.http_client()).await?
                }
                None => warn!(
                    "no issuer jwks_uri, '{}' credential accepted without signature check",
                    flow.configuration.type_key
                ),
            }
        }

        flow.step = IssuanceStep::CredentialReceived { credential };
        Ok(flow)
    }

    /// Decodes the received credential and replaces the stored credential of its type.
    pub async fn persist_credential(&self, flow: IssuanceFlow) -> Result<StoredCredential> {
        let IssuanceStep::CredentialReceived { credential } = &flow.step else {
            return Err(flow.unexpected("persist a credential"));
        };

        let configuration = &flow.configuration;
        let decoded = Credential::parse(&configuration.format, credential)?.decode_claims()?;

        let stored = StoredCredential {
            raw_credential: credential.clone(),
            format: configuration.format.clone(),
            claims_metadata: configuration.claims_metadata.clone(),
            display_metadata: configuration.display_metadata.clone(),
            key_alias: self.config().keys.credential.clone(),
            issued_at: decoded.issued_at,
            expires_at: decoded.expires_at,
        };
        self.store()
            .put_credential(&configuration.type_key, &stored)
            .await?;
        info!(
            "stored '{}' credential with {} claims",
            configuration.type_key,
            decoded.claims.len()
        );
        Ok(stored)
    }
}

/// Whether the credential endpoint rejected the access token rather than the request.
fn requires_reauthentication(status: StatusCode, body: &str) -> bool {
    status == StatusCode::UNAUTHORIZED
        || (!status.is_success() && (body.contains("expired") || body.contains("invalid_token")))
}
