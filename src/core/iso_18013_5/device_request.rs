use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use ciborium::Value as Cbor;
use tracing::{debug, warn};

use super::{cbor_from_bytes, map_get, require, require_text, unwrap_encoded};

/// What a reader asked for in a `DeviceRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequestInfo {
    pub doc_type: String,
    /// Requested element identifiers per namespace, in request order.
    pub requested_items: BTreeMap<String, Vec<String>>,
    /// Whether the reader authenticated the request. The `readerAuth` signature is not checked.
    pub reader_auth_present: bool,
}

/// Parses an encoded `DeviceRequest`.
///
/// Only the first document request is honoured.
pub fn parse_device_request(bytes: &[u8]) -> Result<DeviceRequestInfo> {
    let request = cbor_from_bytes(bytes)?;

    let version = require_text(&request, "version")?;
    if !version.starts_with("1.") {
        bail!("unsupported DeviceRequest version '{version}'")
    }

    let doc_requests = require(&request, "docRequests")?
        .as_array()
        .context("'docRequests' is not an array")?;
    let doc_request = doc_requests
        .first()
        .context("'docRequests' is empty")?;
    if doc_requests.len() > 1 {
        warn!(
            "DeviceRequest has {} document requests, only the first is answered",
            doc_requests.len()
        );
    }

    let items_request = unwrap_encoded(require(doc_request, "itemsRequest")?)
        .context("'itemsRequest' is not an encoded ItemsRequest")?;
    let doc_type = require_text(&items_request, "docType")?.to_string();

    let name_spaces = require(&items_request, "nameSpaces")?
        .as_map()
        .context("'nameSpaces' is not a map")?;

    let mut requested_items = BTreeMap::new();
    for (name_space, elements) in name_spaces {
        let name_space = name_space
            .as_text()
            .context("namespace is not a text string")?;
        let elements = elements
            .as_map()
            .with_context(|| format!("elements of '{name_space}' are not a map"))?
            .iter()
            .map(|(identifier, _intent_to_retain)| {
                identifier
                    .as_text()
                    .map(String::from)
                    .context("element identifier is not a text string")
            })
            .collect::<Result<Vec<_>>>()?;
        requested_items.insert(name_space.to_string(), elements);
    }

    let reader_auth_present = map_get(doc_request, "readerAuth").is_some_and(|a| !a.is_null());

    debug!("device request for {doc_type}: {requested_items:?}");

    Ok(DeviceRequestInfo {
        doc_type,
        requested_items,
        reader_auth_present,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::iso_18013_5::{cbor_to_bytes, text, wrap_encoded};

    /// Encodes a single-document `DeviceRequest`.
    pub fn device_request(
        doc_type: &str,
        items: &[(&str, &[&str])],
        reader_auth: Option<Cbor>,
    ) -> Vec<u8> {
        let name_spaces = items
            .iter()
            .map(|(ns, elements)| {
                (
                    text(*ns),
                    Cbor::Map(
                        elements
                            .iter()
                            .map(|e| (text(*e), Cbor::Bool(false)))
                            .collect(),
                    ),
                )
            })
            .collect();
        let items_request = Cbor::Map(vec![
            (text("docType"), text(doc_type)),
            (text("nameSpaces"), Cbor::Map(name_spaces)),
        ]);

        let mut doc_request = vec![(text("itemsRequest"), wrap_encoded(&items_request).unwrap())];
        if let Some(reader_auth) = reader_auth {
            doc_request.push((text("readerAuth"), reader_auth));
        }

        cbor_to_bytes(&Cbor::Map(vec![
            (text("version"), text("1.0")),
            (
                text("docRequests"),
                Cbor::Array(vec![Cbor::Map(doc_request)]),
            ),
        ]))
        .unwrap()
    }
}
