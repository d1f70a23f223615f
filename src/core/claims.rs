use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::utils::to_human_readable_string;

/// Segment used for a `null` (every array element) path component.
pub const ANY_ARRAY_ELEMENT: &str = "*";

const RESERVED_MEMBERS: [&str; 3] = ["display", "mandatory", "value_type"];

/// Display and policy attributes of one claim, as published by the credential issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMetadata {
    pub path: Vec<String>,
    pub display: String,
    #[serde(default)]
    pub mandatory: bool,
}

/// Ordered claim metadata of one credential type.
///
/// A path of length `n + 1` is a child of the path of length `n` it extends. Top level claims of
/// an SD-JWT have paths of length one; mdoc paths start with the namespace, so top level data
/// elements have paths of length two.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimMetadataTree(Vec<ClaimMetadata>);

impl ClaimMetadataTree {
    pub fn new(entries: Vec<ClaimMetadata>) -> Self {
        Self(entries)
    }

    /// Parses the `claims` value of an OpenID4VCI credential configuration.
    ///
    /// Either the array form (`[{path, display, mandatory}]`) or the nested object form used by
    /// earlier drafts. `null` yields an empty tree.
    pub fn from_issuer_metadata(claims: &Json) -> Result<Self> {
        let mut entries = vec![];
        match claims {
            Json::Array(claims) => {
                for claim in claims {
                    entries.push(parse_claim_description(claim)?);
                }
            }
            Json::Object(claims) => walk_nested(claims, &mut vec![], &mut entries),
            Json::Null => {}
            _ => bail!("'claims' must be an array or an object"),
        }
        Ok(Self(entries))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClaimMetadata> {
        self.0.iter()
    }

    pub fn get(&self, path: &[String]) -> Option<&ClaimMetadata> {
        self.0.iter().find(|claim| claim.path == path)
    }

    /// Direct children of `parent`. Grandchildren are not included.
    pub fn children<'a>(&'a self, parent: &'a [String]) -> impl Iterator<Item = &'a ClaimMetadata> {
        self.0.iter().filter(move |claim| {
            claim.path.len() == parent.len() + 1 && claim.path.starts_with(parent)
        })
    }
}

fn parse_claim_description(claim: &Json) -> Result<ClaimMetadata> {
    let path = claim
        .get("path")
        .and_then(Json::as_array)
        .context("claim description is missing 'path'")?
        .iter()
        .map(|segment| match segment {
            Json::String(s) => Ok(s.clone()),
            Json::Number(n) => Ok(n.to_string()),
            Json::Null => Ok(ANY_ARRAY_ELEMENT.to_string()),
            _ => bail!("invalid claim path segment: {segment}"),
        })
        .collect::<Result<Vec<_>>>()?;

    let Some(last) = path.last() else {
        bail!("claim path must not be empty")
    };

    Ok(ClaimMetadata {
        display: display_name(claim.get("display")).unwrap_or_else(|| to_human_readable_string(last)),
        mandatory: claim
            .get("mandatory")
            .and_then(Json::as_bool)
            .unwrap_or(false),
        path,
    })
}

fn walk_nested(claims: &Map<String, Json>, prefix: &mut Vec<String>, out: &mut Vec<ClaimMetadata>) {
    for (name, value) in claims {
        if RESERVED_MEMBERS.contains(&name.as_str()) {
            continue;
        }
        prefix.push(name.clone());
        out.push(ClaimMetadata {
            path: prefix.clone(),
            display: display_name(value.get("display"))
                .unwrap_or_else(|| to_human_readable_string(name)),
            mandatory: value
                .get("mandatory")
                .and_then(Json::as_bool)
                .unwrap_or(false),
        });
        if let Json::Object(children) = value {
            walk_nested(children, prefix, out);
        }
        prefix.pop();
    }
}

/// Picks an English display name when one is offered, otherwise the first one.
fn display_name(display: Option<&Json>) -> Option<String> {
    let entries = display?.as_array()?;
    let name = |entry: &Json| entry.get("name").and_then(Json::as_str).map(String::from);
    entries
        .iter()
        .find(|entry| {
            entry
                .get("locale")
                .and_then(Json::as_str)
                .is_some_and(|locale| locale.starts_with("en"))
        })
        .and_then(name)
        .or_else(|| entries.iter().find_map(name))
}
