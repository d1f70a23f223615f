use std::ops::Deref;

use anyhow::{bail, Context, Error};
use serde::{Deserialize, Serialize};
use url::Url;

use self::{
    parameters::{
        ClientId, ClientMetadata, Nonce, ResponseMode, ResponseType, ResponseUri, State,
    },
    verification::{fetch_and_verify_jar, verify_jar},
};

use super::{dcql_query::DcqlQuery, object::UntypedObject, util::AsyncHttpClient};

pub mod parameters;
pub mod verification;

/// A verified OpenID4VP request object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "UntypedObject", into = "UntypedObject")]
pub struct AuthorizationRequestObject {
    raw: UntypedObject,
    client_id: ClientId,
    response_mode: ResponseMode,
    response_uri: Url,
    nonce: Nonce,
    state: Option<State>,
    dcql_query: DcqlQuery,
    client_metadata: Option<ClientMetadata>,
}

/// An Authorization Request as received by the wallet, e.g. from a QR code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub client_id: String,
    #[serde(flatten)]
    pub request_indirection: RequestIndirection,
}

/// A RequestObject, passed by value or by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestIndirection {
    #[serde(rename = "request")]
    ByValue(String),
    #[serde(rename = "request_uri")]
    ByReference(Url),
}

impl AuthorizationRequest {
    /// Parse from the query of a request URL, e.g. `openid4vp://?client_id=...&request_uri=...`.
    pub fn from_url(url: &Url) -> anyhow::Result<Self> {
        let query = url
            .query()
            .context("missing query params in Authorization Request uri")?;
        Self::from_query_params(query)
    }

    /// Parse from urlencoded query parameters.
    /// ```
    /// # use openid4vc_wallet::core::authorization_request::AuthorizationRequest;
    /// # use openid4vc_wallet::core::authorization_request::RequestIndirection;
    /// let query = "client_id=x509_hash%3Aabc&request_uri=https%3A%2F%2Fverifier.example%2Fr%2F1";
    ///
    /// let authorization_request = AuthorizationRequest::from_query_params(query).unwrap();
    ///
    /// assert_eq!(authorization_request.client_id, "x509_hash:abc");
    ///
    /// let RequestIndirection::ByReference(request_uri) = authorization_request.request_indirection
    /// else { panic!("expected request-by-reference") };
    /// assert_eq!(request_uri.as_str(), "https://verifier.example/r/1");
    /// ```
    pub fn from_query_params(query_params: &str) -> anyhow::Result<Self> {
        serde_urlencoded::from_str(query_params)
            .context("unable to parse Authorization Request from query params")
    }

    /// Fetches (when passed by reference) and verifies the request object.
    ///
    /// Only `x509_hash` clients are accepted.
    pub async fn resolve(
        self,
        http_client: &(impl AsyncHttpClient + ?Sized),
    ) -> crate::Result<AuthorizationRequestObject> {
        let client_id = ClientId(self.client_id);
        let Some(expected_hash) = client_id.x509_hash() else {
            return Err(crate::Error::Security(format!(
                "unsupported client identifier '{client_id}', expected an x509_hash client"
            )));
        };

        match self.request_indirection {
            RequestIndirection::ByValue(jwt) => verify_jar(&jwt, expected_hash),
            RequestIndirection::ByReference(request_uri) => {
                fetch_and_verify_jar(http_client, &request_uri, expected_hash).await
            }
        }
    }
}

impl AuthorizationRequestObject {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn response_mode(&self) -> &ResponseMode {
        &self.response_mode
    }

    /// Uri to submit the response at.
    pub fn response_uri(&self) -> &Url {
        &self.response_uri
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn state(&self) -> Option<&State> {
        self.state.as_ref()
    }

    pub fn dcql_query(&self) -> &DcqlQuery {
        &self.dcql_query
    }

    pub fn client_metadata(&self) -> Option<&ClientMetadata> {
        self.client_metadata.as_ref()
    }
}

impl From<AuthorizationRequestObject> for UntypedObject {
    fn from(value: AuthorizationRequestObject) -> Self {
        value.raw
    }
}

impl TryFrom<UntypedObject> for AuthorizationRequestObject {
    type Error = Error;

    fn try_from(value: UntypedObject) -> Result<Self, Self::Error> {
        let client_id: ClientId = value.require()?;

        let response_type: ResponseType = value.require()?;
        if !response_type.is_vp_token() {
            bail!(
                "this 'response_type' ({}) is not currently supported",
                response_type.0
            )
        }

        let response_mode: ResponseMode = value.require()?;
        if let ResponseMode::Unsupported(m) = &response_mode {
            bail!("this 'response_mode' ({m}) is not currently supported")
        }

        let response_uri = value
            .require::<ResponseUri>()
            .with_context(|| format!("'response_uri' is required for '{response_mode}'"))?
            .0;

        let nonce = value.require()?;
        let state = value.get().transpose()?;
        let dcql_query = value.require()?;
        let client_metadata = value.get().transpose()?;

        Ok(Self {
            raw: value,
            client_id,
            response_mode,
            response_uri,
            nonce,
            state,
            dcql_query,
            client_metadata,
        })
    }
}

impl Deref for AuthorizationRequestObject {
    type Target = UntypedObject;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}
