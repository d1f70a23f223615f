use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::{
    claims::{ClaimMetadataTree, ANY_ARRAY_ELEMENT},
    dcql_query::DcqlCredentialQuery,
};

use super::{Disclosure, SdJwt};

/// Parent to children table applied when a credential carries no issuer claim metadata.
///
/// Credentials without claim metadata are presented in a degraded mode: only the parents listed
/// here pull in their children.
pub const DEFAULT_CLAIM_GROUPS: &[(&str, &[&str])] = &[
    (
        "address",
        &[
            "formatted",
            "street_address",
            "house_number",
            "locality",
            "region",
            "postal_code",
            "country",
        ],
    ),
    ("place_of_birth", &["locality", "region", "country"]),
    (
        "age_equal_or_over",
        &["12", "14", "16", "18", "21", "65"],
    ),
];

/// Parent to children claim names used in place of issuer claim metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimGroups(BTreeMap<String, Vec<String>>);

impl Default for ClaimGroups {
    fn default() -> Self {
        Self(
            DEFAULT_CLAIM_GROUPS
                .iter()
                .map(|(parent, children)| {
                    (
                        parent.to_string(),
                        children.iter().map(|c| c.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

impl From<BTreeMap<String, Vec<String>>> for ClaimGroups {
    fn from(groups: BTreeMap<String, Vec<String>>) -> Self {
        Self(groups)
    }
}

impl ClaimGroups {
    pub fn children(&self, parent: &str) -> &[String] {
        self.0.get(parent).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Selects the disclosures that answer `query`.
///
/// For every requested path the disclosure at that path is included, together with the
/// disclosures of its ancestors (without which the verifier cannot reach it) and of its direct
/// children. Children are taken from `metadata`, or from `fallback` when the credential carries
/// no claim metadata. Grandchildren are never included.
pub fn resolve_requested_claims(
    query: &DcqlCredentialQuery,
    credential: &SdJwt,
    metadata: &ClaimMetadataTree,
    fallback: &ClaimGroups,
) -> Result<Vec<Disclosure>> {
    if metadata.is_empty() {
        warn!(
            "no claim metadata for credential query '{}', falling back to default claim groups",
            query.id()
        );
    }

    let located: Vec<(Vec<String>, &Disclosure)> = credential
        .locate_disclosures()?
        .into_iter()
        .map(|(path, disclosure)| {
            let path = path.unwrap_or_else(|| disclosure.name().into_iter().map(String::from).collect());
            (path, disclosure)
        })
        .collect();

    let mut selected: Vec<&Disclosure> = vec![];

    for claim in query.requested_claims() {
        let requested = claim.segments();
        let children: Vec<Vec<String>> = if metadata.is_empty() {
            requested
                .last()
                .map(|parent| fallback.children(parent))
                .unwrap_or_default()
                .iter()
                .map(|child| [requested.clone(), vec![child.clone()]].concat())
                .collect()
        } else {
            metadata
                .children(&requested)
                .map(|child| child.path.clone())
                .collect()
        };

        for (path, disclosure) in &located {
            if path.is_empty() {
                continue;
            }
            let is_ancestor_or_self =
                path.len() <= requested.len() && matches_path(&requested[..path.len()], path);
            let is_child = path.len() == requested.len() + 1
                && children.iter().any(|child| matches_path(child, path));

            if (is_ancestor_or_self || is_child)
                && !selected.iter().any(|s| s.encoded() == disclosure.encoded())
            {
                debug!("disclosing {path:?} for requested {requested:?}");
                selected.push(disclosure);
            }
        }
    }

    // Keep the issuer's order.
    Ok(credential
        .disclosures()
        .iter()
        .filter(|d| selected.iter().any(|s| s.encoded() == d.encoded()))
        .cloned()
        .collect())
}

fn matches_path(pattern: &[String], path: &[String]) -> bool {
    pattern.len() == path.len()
        && pattern
            .iter()
            .zip(path)
            .all(|(p, s)| p == s || p == ANY_ARRAY_ELEMENT || s == ANY_ARRAY_ELEMENT)
}
