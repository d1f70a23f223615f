use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use http::{header, Method, Request, Response};
use serde::Serialize;
use url::Url;

use crate::Error;

/// Generic HTTP client.
///
/// A trait is used here so to facilitate native HTTP/TLS when compiled for mobile applications.
#[async_trait]
pub trait AsyncHttpClient: Send + Sync {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;
}

pub(crate) fn base_request() -> http::request::Builder {
    Request::builder().header(header::ACCEPT, "application/json")
}

/// Builds a GET request for `url`.
pub(crate) fn get(url: &Url) -> Result<Request<Vec<u8>>, Error> {
    base_request()
        .method(Method::GET)
        .uri(url.as_str())
        .body(vec![])
        .map_err(Error::http)
}

/// Builds a POST request carrying `body` serialized as JSON, with additional `headers`.
pub(crate) fn post_json<T: Serialize + ?Sized>(
    url: &Url,
    body: &T,
    headers: &[(&str, String)],
) -> Result<Request<Vec<u8>>, Error> {
    let body = serde_json::to_vec(body)?;
    headers
        .iter()
        .fold(
            base_request()
                .method(Method::POST)
                .uri(url.as_str())
                .header(header::CONTENT_TYPE, "application/json"),
            |builder, (name, value)| builder.header(*name, value),
        )
        .body(body)
        .map_err(Error::http)
}

/// Builds a POST request with an `application/x-www-form-urlencoded` body.
pub(crate) fn post_form<T: Serialize + ?Sized>(
    url: &Url,
    body: &T,
) -> Result<Request<Vec<u8>>, Error> {
    let body = serde_urlencoded::to_string(body)
        .context("unable to encode form body")?
        .into_bytes();
    base_request()
        .method(Method::POST)
        .uri(url.as_str())
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .map_err(Error::http)
}

/// Executes `request`, translating transport failures into [Error::Http].
pub(crate) async fn send(
    client: &(impl AsyncHttpClient + ?Sized),
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    tracing::debug!("{method} {uri}");
    client.execute(request).await.map_err(Error::http)
}

/// Lossy UTF-8 rendering of a response body, for error reporting.
pub(crate) fn body_text(response: &Response<Vec<u8>>) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}

#[derive(Debug)]
pub struct ReqwestClient(reqwest::Client);

impl AsRef<reqwest::Client> for ReqwestClient {
    fn as_ref(&self) -> &reqwest::Client {
        &self.0
    }
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("unable to build http_client")
            .map(Self)
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let response = self
            .0
            .execute(request.try_into().context("unable to convert request")?)
            .await
            .context("http request failed")?;

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());

        builder
            .headers_mut()
            .context("unable to set headers")?
            .extend(response.headers().clone());

        builder
            .body(
                response
                    .bytes()
                    .await
                    .context("failed to extract response body")?
                    .to_vec(),
            )
            .context("unable to construct response")
    }
}
