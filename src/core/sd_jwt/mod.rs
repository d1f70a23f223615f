//! SD-JWT credentials in the compact `issuer-jwt~disclosure~...~[kb-jwt]` form.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::core::{claims::ANY_ARRAY_ELEMENT, jwt};

pub mod disclosure;
pub mod presentation;
pub mod selection;
pub mod verify;

pub use disclosure::{Disclosure, DisclosureKind};
pub use presentation::create_presentation;
pub use selection::{resolve_requested_claims, ClaimGroups, DEFAULT_CLAIM_GROUPS};
pub use verify::verify;

pub const SD_CLAIM: &str = "_sd";
pub const SD_ALG_CLAIM: &str = "_sd_alg";
const ARRAY_ELEMENT_DIGEST: &str = "...";

/// Members of the issuer JWT payload that describe the token rather than the subject.
const REGISTERED_CLAIMS: [&str; 9] = [
    SD_CLAIM,
    SD_ALG_CLAIM,
    "cnf",
    "iss",
    "iat",
    "exp",
    "nbf",
    "status",
    "vct",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SdJwt {
    issuer_jwt: String,
    disclosures: Vec<Disclosure>,
    key_binding_jwt: Option<String>,
}

impl SdJwt {
    pub fn parse(sd_jwt: &str) -> Result<Self> {
        let mut parts = sd_jwt.trim().split('~');
        let issuer_jwt = parts
            .next()
            .filter(|jwt| !jwt.is_empty())
            .context("sd-jwt is missing the issuer jwt")?;
        jwt::split_jws(issuer_jwt).context("issuer jwt is malformed")?;

        let mut rest: Vec<&str> = parts.collect();
        // The last segment is empty unless a key binding JWT is attached.
        let key_binding_jwt = match rest.last() {
            Some(kb) if kb.contains('.') => Some(kb.to_string()),
            _ => None,
        };
        if key_binding_jwt.is_some() {
            rest.pop();
        }

        let disclosures = rest
            .into_iter()
            .filter(|d| !d.is_empty())
            .map(Disclosure::parse)
            .collect::<Result<_>>()?;

        Ok(Self {
            issuer_jwt: issuer_jwt.to_owned(),
            disclosures,
            key_binding_jwt,
        })
    }

    pub fn issuer_jwt(&self) -> &str {
        &self.issuer_jwt
    }

    pub fn disclosures(&self) -> &[Disclosure] {
        &self.disclosures
    }

    pub fn key_binding_jwt(&self) -> Option<&str> {
        self.key_binding_jwt.as_deref()
    }

    pub fn issuer_header(&self) -> Result<Map<String, Json>> {
        Ok(jwt::decode_unverified(&self.issuer_jwt)?.0)
    }

    pub fn issuer_claims(&self) -> Result<Map<String, Json>> {
        Ok(jwt::decode_unverified(&self.issuer_jwt)?.1)
    }

    /// Serializes the issuer JWT with `disclosures` and no key binding JWT, i.e. the input of
    /// `sd_hash`.
    pub fn serialize_with<'a>(&self, disclosures: impl IntoIterator<Item = &'a Disclosure>) -> String {
        let mut out = self.issuer_jwt.clone();
        for disclosure in disclosures {
            out.push('~');
            out.push_str(disclosure.encoded());
        }
        out.push('~');
        out
    }

    /// Places every disclosure at its claim path by following the digests of the issuer JWT.
    ///
    /// Disclosures no digest refers to are returned with a `None` path.
    pub fn locate_disclosures(&self) -> Result<Vec<(Option<Vec<String>>, &Disclosure)>> {
        let claims = self.issuer_claims()?;
        if let Some(alg) = claims.get(SD_ALG_CLAIM).and_then(Json::as_str) {
            if alg != "sha-256" {
                bail!("unsupported _sd_alg '{alg}'")
            }
        }

        let by_digest: BTreeMap<String, &Disclosure> = self
            .disclosures
            .iter()
            .map(|disclosure| (disclosure.digest(), disclosure))
            .collect();

        let mut located = BTreeMap::new();
        walk_object(&claims, &mut vec![], &by_digest, &mut located);

        Ok(self
            .disclosures
            .iter()
            .map(|disclosure| (located.get(&disclosure.digest()).cloned(), disclosure))
            .collect())
    }
}

fn walk_object(
    object: &Map<String, Json>,
    path: &mut Vec<String>,
    by_digest: &BTreeMap<String, &Disclosure>,
    located: &mut BTreeMap<String, Vec<String>>,
) {
    if let Some(Json::Array(digests)) = object.get(SD_CLAIM) {
        for digest in digests.iter().filter_map(Json::as_str) {
            let Some(disclosure) = by_digest.get(digest) else {
                continue;
            };
            let Some(name) = disclosure.name() else {
                continue;
            };
            path.push(name.to_owned());
            located.insert(digest.to_owned(), path.clone());
            walk_value(disclosure.value(), path, by_digest, located);
            path.pop();
        }
    }

    for (name, value) in object {
        if name == SD_CLAIM {
            continue;
        }
        path.push(name.clone());
        walk_value(value, path, by_digest, located);
        path.pop();
    }
}

fn walk_value(
    value: &Json,
    path: &mut Vec<String>,
    by_digest: &BTreeMap<String, &Disclosure>,
    located: &mut BTreeMap<String, Vec<String>>,
) {
    match value {
        Json::Object(object) => walk_object(object, path, by_digest, located),
        Json::Array(items) => {
            path.push(ANY_ARRAY_ELEMENT.to_owned());
            for item in items {
                match item.get(ARRAY_ELEMENT_DIGEST).and_then(Json::as_str) {
                    Some(digest) => {
                        if let Some(disclosure) = by_digest.get(digest) {
                            located.insert(digest.to_owned(), path.clone());
                            walk_value(disclosure.value(), path, by_digest, located);
                        }
                    }
                    None => walk_value(item, path, by_digest, located),
                }
            }
            path.pop();
        }
        _ => {}
    }
}

/// Decodes the subject claims of an SD-JWT into a flat map.
///
/// Disclosed claims and plain issuer claims are keyed by name. Members of object values are
/// lifted one level into the map in place of their parent, and disclosures of digest containers
/// are skipped since their children are disclosed separately.
pub fn decode(sd_jwt: &str) -> Result<BTreeMap<String, Json>> {
    let sd_jwt = SdJwt::parse(sd_jwt)?;
    let mut claims = BTreeMap::new();

    for (name, value) in sd_jwt.issuer_claims()? {
        if REGISTERED_CLAIMS.contains(&name.as_str()) {
            continue;
        }
        insert_flattened(&mut claims, name, value);
    }

    for disclosure in sd_jwt.disclosures() {
        let DisclosureKind::Property { name, value } = &disclosure.kind else {
            continue;
        };
        if disclosure.is_digest_container() {
            debug!("skipping digest container '{name}'");
            continue;
        }
        insert_flattened(&mut claims, name.clone(), value.clone());
    }

    Ok(claims)
}

fn insert_flattened(claims: &mut BTreeMap<String, Json>, name: String, value: Json) {
    match value {
        Json::Object(members) => {
            for (member, value) in members {
                if member == SD_CLAIM {
                    continue;
                }
                claims.insert(member, value);
            }
        }
        value => {
            claims.insert(name, value);
        }
    }
}
