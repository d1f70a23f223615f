use std::fmt;

use anyhow::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use url::Url;

use crate::core::object::{ParsingErrorContext, TypedParameter, UntypedObject};

/// Implements [TypedParameter] for a newtype over a JSON-deserializable value.
macro_rules! typed_parameter {
    ($name:ident, $key:literal) => {
        impl TypedParameter for $name {
            const KEY: &'static str = $key;
        }

        impl TryFrom<Json> for $name {
            type Error = Error;

            fn try_from(value: Json) -> Result<Self, Self::Error> {
                Ok(serde_json::from_value(value).map(Self)?)
            }
        }

        impl From<$name> for Json {
            fn from(value: $name) -> Self {
                serde_json::to_value(value.0).unwrap_or(Json::Null)
            }
        }
    };
}

const X509_HASH: &str = "x509_hash";

/// `client_id` of the verifier, including its client identifier prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

typed_parameter!(ClientId, "client_id");

impl ClientId {
    /// The certificate hash of an `x509_hash` client id: the base64url SHA-256 of the
    /// verifier's leaf certificate.
    pub fn x509_hash(&self) -> Option<&str> {
        let (prefix, hash) = self.0.split_once(':')?;
        (prefix == X509_HASH).then_some(hash)
    }

    pub fn for_x509_hash(hash: &str) -> Self {
        Self(format!("{X509_HASH}:{hash}"))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nonce(pub String);

typed_parameter!(Nonce, "nonce");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State(pub String);

typed_parameter!(State, "state");

/// `response_uri` field in the Authorization Request.
#[derive(Debug, Clone)]
pub struct ResponseUri(pub Url);

typed_parameter!(ResponseUri, "response_uri");

const DIRECT_POST: &str = "direct_post";
const DIRECT_POST_JWT: &str = "direct_post.jwt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ResponseMode {
    /// The `direct_post` response mode as defined in OID4VP.
    DirectPost,
    /// The `direct_post.jwt` response mode as defined in OID4VP.
    DirectPostJwt,
    /// A ResponseMode that is unsupported by this library.
    Unsupported(String),
}

impl ResponseMode {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::DirectPostJwt)
    }
}

impl TypedParameter for ResponseMode {
    const KEY: &'static str = "response_mode";
}

impl From<String> for ResponseMode {
    fn from(s: String) -> Self {
        match s.as_str() {
            DIRECT_POST => ResponseMode::DirectPost,
            DIRECT_POST_JWT => ResponseMode::DirectPostJwt,
            _ => ResponseMode::Unsupported(s),
        }
    }
}

impl From<ResponseMode> for String {
    fn from(s: ResponseMode) -> Self {
        match s {
            ResponseMode::DirectPost => DIRECT_POST.into(),
            ResponseMode::DirectPostJwt => DIRECT_POST_JWT.into(),
            ResponseMode::Unsupported(u) => u,
        }
    }
}

impl TryFrom<Json> for ResponseMode {
    type Error = Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        let s: String = serde_json::from_value(value)?;
        Ok(s.into())
    }
}

impl From<ResponseMode> for Json {
    fn from(rm: ResponseMode) -> Self {
        String::from(rm).into()
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::DirectPost => DIRECT_POST,
            ResponseMode::DirectPostJwt => DIRECT_POST_JWT,
            ResponseMode::Unsupported(u) => u,
        }
        .fmt(f)
    }
}

/// `response_type` field in the Authorization Request. Only `vp_token` is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseType(pub String);

typed_parameter!(ResponseType, "response_type");

impl ResponseType {
    pub const VP_TOKEN: &'static str = "vp_token";

    pub fn is_vp_token(&self) -> bool {
        self.0 == Self::VP_TOKEN
    }
}

/// `client_metadata` field in the Authorization Request.
#[derive(Debug, Clone)]
pub struct ClientMetadata(pub UntypedObject);

impl TypedParameter for ClientMetadata {
    const KEY: &'static str = "client_metadata";
}

impl From<ClientMetadata> for Json {
    fn from(cm: ClientMetadata) -> Self {
        cm.0.into()
    }
}

impl TryFrom<Json> for ClientMetadata {
    type Error = Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        Ok(serde_json::from_value(value).map(ClientMetadata)?)
    }
}

/// Content encryption requested when the verifier does not ask for [AES_128_GCM].
pub const AES_256_GCM: &str = "A256GCM";
pub const AES_128_GCM: &str = "A128GCM";

impl ClientMetadata {
    pub fn jwks(&self) -> anyhow::Result<Jwks> {
        self.0.get().parsing_error()
    }

    /// The content encryption algorithm for an encrypted response.
    ///
    /// `A128GCM` when the verifier asks for it, otherwise `A256GCM`.
    ///
    /// An explicit `authorization_encrypted_response_enc` wins; failing that, `A128GCM` is used
    /// whenever it appears in `encrypted_response_enc_values_supported`.
    pub fn response_enc(&self) -> &'static str {
        if let Some(enc) = self
            .0
             .0
            .get("authorization_encrypted_response_enc")
            .and_then(Json::as_str)
        {
            return if enc == AES_128_GCM {
                AES_128_GCM
            } else {
                AES_256_GCM
            };
        }

        let supported = self
            .0
             .0
            .get("encrypted_response_enc_values_supported")
            .and_then(Json::as_array);
        match supported {
            Some(values) if values.iter().any(|v| v.as_str() == Some(AES_128_GCM)) => AES_128_GCM,
            _ => AES_256_GCM,
        }
    }
}

/// `jwks` member of the client metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Map<String, Json>>,
}

impl TypedParameter for Jwks {
    const KEY: &'static str = "jwks";
}

impl TryFrom<Json> for Jwks {
    type Error = Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        Ok(serde_json::from_value(value)?)
    }
}

impl From<Jwks> for Json {
    fn from(value: Jwks) -> Self {
        serde_json::json!({ "keys": value.keys })
    }
}
