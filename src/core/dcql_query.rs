use crate::{
    core::{claims::ANY_ARRAY_ELEMENT, credential_format::CredentialFormat, object::TypedParameter},
    utils::NonEmptyVec,
};
use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlQuery {
    credentials: NonEmptyVec<DcqlCredentialQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_sets: Option<NonEmptyVec<DcqlCredentialSetQuery>>,
}

impl DcqlQuery {
    pub fn credentials(&self) -> &[DcqlCredentialQuery] {
        &self.credentials
    }

    pub fn credential_sets(&self) -> Option<&NonEmptyVec<DcqlCredentialSetQuery>> {
        self.credential_sets.as_ref()
    }

    /// Whether a response carrying only the credential of `query_id` satisfies every required
    /// credential set. Always true when the query has no credential sets.
    pub fn answered_by(&self, query_id: &str) -> bool {
        let Some(sets) = &self.credential_sets else {
            return true;
        };
        sets.iter().filter(|set| set.is_required()).all(|set| {
            set.options()
                .iter()
                .any(|option| !option.is_empty() && option.iter().all(|id| id == query_id))
        })
    }
}

impl TypedParameter for DcqlQuery {
    const KEY: &'static str = "dcql_query";
}

impl TryFrom<Json> for DcqlQuery {
    type Error = Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        serde_json::from_value(value).context("invalid dcql_query")
    }
}

impl TryFrom<DcqlQuery> for Json {
    type Error = Error;

    fn try_from(value: DcqlQuery) -> Result<Self, Self::Error> {
        serde_json::to_value(value).map_err(Error::from)
    }
}

/// A Credential Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.1>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialQuery {
    /// REQUIRED. A string identifying the Credential in the response.
    id: String,

    /// REQUIRED. A string that specifies the requested format for the Credential.
    format: CredentialFormat,

    /// Format-specific constraints (`vct_values` for SD-JWT VC, `doctype_value` for mso_mdoc).
    #[serde(default)]
    meta: serde_json::Map<String, Json>,

    /// OPTIONAL. An array of objects that specifies claims in the Credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<NonEmptyVec<DcqlCredentialClaimsQuery>>,

    /// OPTIONAL. An array of claim set identifiers for alternative claim combinations.
    #[serde(skip_serializing_if = "Option::is_none")]
    claim_sets: Option<NonEmptyVec<Vec<String>>>,
}

impl DcqlCredentialQuery {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> &CredentialFormat {
        &self.format
    }

    /// Accepted `vct` values of an SD-JWT VC query.
    pub fn vct_values(&self) -> Option<Vec<&str>> {
        self.meta
            .get("vct_values")
            .and_then(Json::as_array)
            .map(|values| values.iter().filter_map(Json::as_str).collect())
    }

    /// Requested document type of an mso_mdoc query.
    pub fn doctype_value(&self) -> Option<&str> {
        self.meta.get("doctype_value").and_then(Json::as_str)
    }

    /// The claims this query requests, narrowed to the first claim set when claim sets are
    /// given.
    pub fn requested_claims(&self) -> Vec<&DcqlCredentialClaimsQuery> {
        let Some(claims) = &self.claims else {
            return vec![];
        };
        match self.claim_sets.as_ref().and_then(|sets| sets.first()) {
            Some(set) => claims
                .iter()
                .filter(|claim| claim.id().is_some_and(|id| set.contains(id)))
                .collect(),
            None => claims.iter().collect(),
        }
    }
}

/// A Credential Set Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.2>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialSetQuery {
    options: NonEmptyVec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<bool>,
}

impl DcqlCredentialSetQuery {
    pub fn options(&self) -> &NonEmptyVec<Vec<String>> {
        &self.options
    }

    /// Defaults to `true` if not explicitly set.
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }
}

/// A Claims Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.3>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialClaimsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    path: NonEmptyVec<DcqlCredentialClaimsQueryPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    intent_to_retain: Option<bool>,
}

impl DcqlCredentialClaimsQuery {
    pub fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    /// The path as claim metadata segments.
    pub fn segments(&self) -> Vec<String> {
        self.path
            .iter()
            .map(|segment| match segment {
                DcqlCredentialClaimsQueryPath::String(s) => s.clone(),
                DcqlCredentialClaimsQueryPath::Integer(i) => i.to_string(),
                DcqlCredentialClaimsQueryPath::Null => ANY_ARRAY_ELEMENT.to_string(),
            })
            .collect()
    }

    /// For mdoc credentials, the DCQL path structure is `[namespace, element_identifier]`.
    pub fn namespace(&self) -> Option<&str> {
        match self.path.first() {
            Some(DcqlCredentialClaimsQueryPath::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// See [namespace](Self::namespace).
    pub fn element_identifier(&self) -> Option<&str> {
        match self.path.get(1) {
            Some(DcqlCredentialClaimsQueryPath::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DcqlCredentialClaimsQueryPath {
    String(String),
    Null,
    Integer(usize),
}
