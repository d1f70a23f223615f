use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{Map, Value as Json};

use super::{
    authorization_request::parameters::State,
    object::{TypedParameter, UntypedObject},
};

/// The DCQL `vp_token`: presentations keyed by the id of the credential query they answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpToken(pub BTreeMap<String, Vec<String>>);

impl VpToken {
    pub fn single(credential_query_id: impl Into<String>, presentation: String) -> Self {
        Self(BTreeMap::from([(
            credential_query_id.into(),
            vec![presentation],
        )]))
    }
}

impl TypedParameter for VpToken {
    const KEY: &'static str = "vp_token";
}

impl TryFrom<Json> for VpToken {
    type Error = anyhow::Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        Ok(serde_json::from_value(value).map(Self)?)
    }
}

impl From<VpToken> for Json {
    fn from(value: VpToken) -> Self {
        Json::Object(
            value
                .0
                .into_iter()
                .map(|(id, presentations)| (id, presentations.into()))
                .collect(),
        )
    }
}

/// An authorization response, before encoding for the response mode.
#[derive(Debug, Clone)]
pub enum AuthorizationResponse {
    /// `direct_post`: the parameters are posted as form fields.
    Unencoded(UnencodedAuthorizationResponse),
    /// `direct_post.jwt`: the parameters are posted as a JWE in the `response` field.
    Jwt(JwtAuthorizationResponse),
}

#[derive(Debug, Clone)]
pub struct UnencodedAuthorizationResponse {
    pub vp_token: VpToken,
    pub state: Option<State>,
}

#[derive(Debug, Clone)]
pub struct JwtAuthorizationResponse {
    pub response: String,
}

impl UnencodedAuthorizationResponse {
    /// The response parameters as a JSON object: `{"vp_token": {...}, "state"?: ...}`.
    pub fn payload(&self) -> Result<Map<String, Json>> {
        let mut object = UntypedObject::new();
        object.insert(self.vp_token.clone())?;
        if let Some(state) = &self.state {
            object.insert(state.clone())?;
        }
        Ok(object.0)
    }
}

impl AuthorizationResponse {
    /// The `application/x-www-form-urlencoded` fields of the response. Non-string parameters
    /// are JSON encoded.
    pub fn form_fields(&self) -> Result<Vec<(String, String)>> {
        match self {
            Self::Unencoded(response) => Ok(response
                .payload()?
                .into_iter()
                .map(|(key, value)| match value {
                    Json::String(s) => (key, s),
                    other => (key, other.to_string()),
                })
                .collect()),
            Self::Jwt(response) => Ok(vec![("response".into(), response.response.clone())]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vp_token_is_keyed_by_credential_query() {
        let vp_token = VpToken::single("pid", "eyJ...~".into());
        assert_eq!(Json::from(vp_token.clone()), json!({ "pid": ["eyJ...~"] }));
        assert_eq!(VpToken::try_from(json!({ "pid": ["eyJ...~"] })).unwrap(), vp_token);
    }

    #[test]
    fn unencoded_response_form_fields() {
        let response = AuthorizationResponse::Unencoded(UnencodedAuthorizationResponse {
            vp_token: VpToken::single("mdl", "o2d2ZXJzaW9u".into()),
            state: Some(State("xyz".into())),
        });
        let mut fields = response.form_fields().unwrap();
        fields.sort();
        assert_eq!(
            fields,
            vec![
                ("state".to_string(), "xyz".to_string()),
                ("vp_token".to_string(), r#"{"mdl":["o2d2ZXJzaW9u"]}"#.to_string()),
            ]
        );
    }

    #[test]
    fn state_is_omitted_when_absent() {
        let response = UnencodedAuthorizationResponse {
            vp_token: VpToken::single("pid", "x".into()),
            state: None,
        };
        assert_eq!(
            Json::from(response.payload().unwrap()),
            json!({ "vp_token": { "pid": ["x"] } })
        );
    }

    #[test]
    fn jwt_response_is_a_single_field() {
        let response = AuthorizationResponse::Jwt(JwtAuthorizationResponse {
            response: "a.b.c.d.e".into(),
        });
        assert_eq!(
            response.form_fields().unwrap(),
            vec![("response".to_string(), "a.b.c.d.e".to_string())]
        );
    }
}
