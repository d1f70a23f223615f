use http::{header, Method, Request};
use tracing::{debug, info};
use url::Url;

use crate::core::{
    jwt,
    object::UntypedObject,
    util::{self, AsyncHttpClient},
};
use crate::{Error, Result};

use super::{parameters::ClientId, AuthorizationRequestObject};

use self::verifier::P256Verifier;

pub mod verifier;
pub mod x509_hash;

/// Media type of a request object returned from a `request_uri`.
pub const REQUEST_OBJECT_CONTENT_TYPE: &str = "application/oauth-authz-req+jwt";

/// Fetches the request object at `request_uri` and verifies it was signed by the `x509_hash`
/// client whose certificate hashes to `expected_client_id_hash`.
pub async fn fetch_and_verify_jar(
    http_client: &(impl AsyncHttpClient + ?Sized),
    request_uri: &Url,
    expected_client_id_hash: &str,
) -> Result<AuthorizationRequestObject> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(request_uri.as_str())
        .header(header::ACCEPT, REQUEST_OBJECT_CONTENT_TYPE)
        .body(vec![])
        .map_err(Error::http)?;

    let response = util::send(http_client, request).await?;
    let status = response.status();
    let body = util::body_text(&response);
    if !status.is_success() {
        return Err(Error::Presentation {
            status: status.as_u16(),
            body,
        });
    }

    verify_jar(body.trim(), expected_client_id_hash)
}

/// Verifies a request object passed by value. See [fetch_and_verify_jar].
pub fn verify_jar(
    request_jwt: &str,
    expected_client_id_hash: &str,
) -> Result<AuthorizationRequestObject> {
    x509_hash::validate::<P256Verifier>(request_jwt, expected_client_id_hash)?;

    let (_, claims) = jwt::decode_unverified(request_jwt)?;
    let request = AuthorizationRequestObject::try_from(UntypedObject::from(claims))?;

    let expected = ClientId::for_x509_hash(expected_client_id_hash);
    if request.client_id() != &expected {
        return Err(Error::Security(format!(
            "request object client_id '{}' does not match '{expected}'",
            request.client_id()
        )));
    }

    debug!("request object claims: {:?}", request.as_map().keys());
    info!("verified request object from {}", request.client_id());
    Ok(request)
}
