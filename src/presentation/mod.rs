//! OpenID4VP presentation.
//!
//! A flow runs `fetch_request -> resolve_dcql -> build_vp -> submit`. As with issuance, each step
//! consumes the [PresentationFlow] and returns it advanced.

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{
    core::{
        authorization_request::{
            verification::fetch_and_verify_jar, AuthorizationRequest, AuthorizationRequestObject,
        },
        jwe::{self, EncryptionJwk},
        response::{
            AuthorizationResponse, JwtAuthorizationResponse, UnencodedAuthorizationResponse,
            VpToken,
        },
        signer::WalletSigner,
        storage::Storage,
        util::{self, AsyncHttpClient},
    },
    credential::{Credential, PresentationContext, StoredCredential},
    wallet::Wallet,
    Error, Result,
};

/// What the verifier asked the wallet to do after a successful submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubmissionOutcome {
    #[serde(default)]
    pub redirect_uri: Option<Url>,
}

#[derive(Debug, Clone)]
pub enum PresentationStep {
    /// The request object has been fetched and verified.
    Verified,
    /// A stored credential answers the credential query `query_id`.
    Resolved {
        query_id: String,
        credential: StoredCredential,
    },
    Built {
        vp_token: VpToken,
    },
}

/// State of one presentation.
#[derive(Debug, Clone)]
pub struct PresentationFlow {
    request: AuthorizationRequestObject,
    step: PresentationStep,
}

impl PresentationFlow {
    pub fn new(request: AuthorizationRequestObject) -> Self {
        Self {
            request,
            step: PresentationStep::Verified,
        }
    }

    pub fn request(&self) -> &AuthorizationRequestObject {
        &self.request
    }

    pub fn step(&self) -> &PresentationStep {
        &self.step
    }

    fn unexpected(&self, operation: &str) -> Error {
        Error::State(format!("cannot {operation} in step {:?}", self.step))
    }

    /// The verifier key to encrypt the response to, for `direct_post.jwt`.
    fn encryption_jwk(&self) -> Result<Option<EncryptionJwk>> {
        if !self.request.response_mode().is_encrypted() {
            return Ok(None);
        }
        Ok(Some(jwe::encryption_jwk(&self.request)?))
    }
}

impl<H, W, S> Wallet<H, W, S>
where
    H: AsyncHttpClient,
    W: WalletSigner,
    S: Storage,
{
    /// Presents the credential stored under `type_key` in answer to the request at
    /// `request_uri`.
    pub async fn present(
        &self,
        request_uri: &Url,
        expected_client_id_hash: &str,
        type_key: &str,
    ) -> Result<SubmissionOutcome> {
        let flow = self
            .fetch_request(request_uri, expected_client_id_hash)
            .await?;
        let flow = self.resolve_dcql(flow, type_key).await?;
        let flow = self.build_vp(flow).await?;
        self.submit(flow).await
    }

    /// Fetches the request object from `request_uri` and verifies it against the `x509_hash`
    /// client identifier.
    pub async fn fetch_request(
        &self,
        request_uri: &Url,
        expected_client_id_hash: &str,
    ) -> Result<PresentationFlow> {
        let request =
            fetch_and_verify_jar(self.http_client(), request_uri, expected_client_id_hash).await?;
        Ok(PresentationFlow::new(request))
    }

    /// Like [fetch_request](Self::fetch_request), for a request URL as scanned from a QR code.
    pub async fn resolve_request(&self, request_url: &Url) -> Result<PresentationFlow> {
        let request = AuthorizationRequest::from_url(request_url)?
            .resolve(self.http_client())
            .await?;
        Ok(PresentationFlow::new(request))
    }

    /// Selects the credential query answered by the credential stored under `type_key`.
    pub async fn resolve_dcql(
        &self,
        mut flow: PresentationFlow,
        type_key: &str,
    ) -> Result<PresentationFlow> {
        if !matches!(flow.step, PresentationStep::Verified) {
            return Err(flow.unexpected("resolve the query"));
        }

        let stored = self
            .store()
            .credential(type_key)
            .await?
            .ok_or_else(|| Error::State(format!("no '{type_key}' credential is stored")))?;
        let credential = Credential::from_stored(&stored)?;

        let dcql_query = flow.request.dcql_query();
        let mut query_id = None;
        for query in dcql_query.credentials() {
            if !dcql_query.answered_by(query.id()) {
                debug!("credential query '{}' alone leaves a credential set unmet", query.id());
                continue;
            }
            if credential.satisfies(query)? {
                query_id = Some(query.id().to_string());
                break;
            }
            debug!("credential query '{}' not satisfied by '{type_key}'", query.id());
        }
        let query_id = query_id.ok_or_else(|| {
            Error::State(format!(
                "the stored '{type_key}' credential answers none of the requested credentials"
            ))
        })?;

        flow.step = PresentationStep::Resolved {
            query_id,
            credential: stored,
        };
        Ok(flow)
    }

    pub async fn build_vp(&self, mut flow: PresentationFlow) -> Result<PresentationFlow> {
        let PresentationStep::Resolved {
            query_id,
            credential: stored,
        } = &flow.step
        else {
            return Err(flow.unexpected("build a presentation"));
        };

        let request = &flow.request;
        let query = request
            .dcql_query()
            .credentials()
            .iter()
            .find(|query| query.id() == query_id)
            .ok_or_else(|| Error::State(format!("credential query '{query_id}' disappeared")))?;

        let encryption_jwk = flow.encryption_jwk()?;
        let client_id = request.client_id().to_string();
        let context = PresentationContext {
            client_id: &client_id,
            nonce: &request.nonce().0,
            response_uri: request.response_uri().as_str(),
            encryption_jwk: encryption_jwk.as_ref().map(|key| &key.jwk),
            claims_metadata: &stored.claims_metadata,
            claim_groups: self.claim_groups(),
        };

        let presentation = Credential::from_stored(stored)?
            .build_presentation(query, &context, self.signer(), &stored.key_alias)
            .await?;

        let vp_token = VpToken::single(query_id.clone(), presentation);
        flow.step = PresentationStep::Built { vp_token };
        Ok(flow)
    }

    /// Posts the `vp_token`, encrypted for `direct_post.jwt`, to the verifier's `response_uri`.
    pub async fn submit(&self, flow: PresentationFlow) -> Result<SubmissionOutcome> {
        let PresentationStep::Built { vp_token } = &flow.step else {
            return Err(flow.unexpected("submit"));
        };

        let request = &flow.request;
        let unencoded = UnencodedAuthorizationResponse {
            vp_token: vp_token.clone(),
            state: request.state().cloned(),
        };
        let response = match flow.encryption_jwk()? {
            Some(recipient) => AuthorizationResponse::Jwt(JwtAuthorizationResponse {
                response: jwe::build_encrypted_response(request, &recipient, unencoded.payload()?)?,
            }),
            None => AuthorizationResponse::Unencoded(unencoded),
        };

        let http_request = util::post_form(request.response_uri(), &response.form_fields()?)?;
        let http_response = util::send(self.http_client(), http_request).await?;

        let status = http_response.status();
        let body = util::body_text(&http_response);
        if !status.is_success() {
            return Err(Error::Presentation {
                status: status.as_u16(),
                body,
            });
        }

        let outcome = interpret_response(&body);
        info!(
            "presentation accepted by {} (redirect: {:?})",
            request.client_id(),
            outcome.redirect_uri.as_ref().map(Url::as_str)
        );
        Ok(outcome)
    }
}

/// Reads the verifier's answer to a successful submission. Anything but a JSON object carrying
/// a `redirect_uri` means there is nowhere to go next.
fn interpret_response(body: &str) -> SubmissionOutcome {
    serde_json::from_str(body).unwrap_or_default()
}
