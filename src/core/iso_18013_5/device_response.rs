use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use ciborium::Value as Cbor;
use tracing::debug;

use crate::core::signer::WalletSigner;
use crate::Result;

use super::{
    cbor_from_bytes, cbor_to_bytes, cose, mso, require, require_text, text, unwrap_encoded,
    wrap_encoded,
};

/// Element identifiers to disclose, per namespace.
pub type ElementSelection = BTreeMap<String, BTreeSet<String>>;

/// Builds an encoded `DeviceResponse` for a stored `IssuerSigned` structure.
///
/// Only items named in `selection` are kept, and namespaces left without items are dropped. The
/// kept `IssuerSignedItemBytes` and the `issuerAuth` are copied unchanged. Device authentication
/// is a detached COSE_Sign1 over `DeviceAuthenticationBytes`, computed from `session_transcript`
/// (an encoded `SessionTranscript`) and empty device-signed namespaces.
pub async fn build_device_response(
    issuer_signed: &[u8],
    selection: &ElementSelection,
    session_transcript: &[u8],
    signer: &(impl WalletSigner + ?Sized),
    key_alias: &str,
) -> Result<Vec<u8>> {
    let stored = cbor_from_bytes(issuer_signed)?;
    let issuer_signed = mso::issuer_signed(&stored)?;
    let issuer_auth = require(issuer_signed, "issuerAuth")?;
    let mobile_security_object = mso::mobile_security_object(issuer_auth)?;
    let doc_type = require_text(&mobile_security_object, "docType")?.to_string();

    let name_spaces = filter_name_spaces(require(issuer_signed, "nameSpaces")?, selection)?;

    let device_name_spaces = wrap_encoded(&Cbor::Map(vec![]))?;
    let session_transcript =
        cbor_from_bytes(session_transcript).context("invalid SessionTranscript")?;
    let device_authentication = Cbor::Array(vec![
        text("DeviceAuthentication"),
        session_transcript,
        text(doc_type.clone()),
        device_name_spaces.clone(),
    ]);
    let device_authentication_bytes = cbor_to_bytes(&wrap_encoded(&device_authentication)?)?;

    let device_signature =
        cose::sign_detached(signer, key_alias, &device_authentication_bytes).await?;

    let document = Cbor::Map(vec![
        (text("docType"), text(doc_type.clone())),
        (
            text("issuerSigned"),
            Cbor::Map(vec![
                (text("nameSpaces"), name_spaces),
                (text("issuerAuth"), issuer_auth.clone()),
            ]),
        ),
        (
            text("deviceSigned"),
            Cbor::Map(vec![
                (text("nameSpaces"), device_name_spaces),
                (
                    text("deviceAuth"),
                    Cbor::Map(vec![(text("deviceSignature"), device_signature)]),
                ),
            ]),
        ),
    ]);

    debug!("built device response for {doc_type}");

    Ok(cbor_to_bytes(&Cbor::Map(vec![
        (text("version"), text("1.0")),
        (text("documents"), Cbor::Array(vec![document])),
        (text("status"), Cbor::Integer(0.into())),
    ]))?)
}

fn filter_name_spaces(name_spaces: &Cbor, selection: &ElementSelection) -> anyhow::Result<Cbor> {
    let name_spaces = name_spaces
        .as_map()
        .context("'nameSpaces' is not a map")?;

    let mut kept = vec![];
    for (name_space, items) in name_spaces {
        let Some(selected) = name_space.as_text().and_then(|ns| selection.get(ns)) else {
            continue;
        };
        let items = items.as_array().context("namespace items are not an array")?;

        let mut kept_items = vec![];
        for item in items {
            let decoded = unwrap_encoded(item).context("invalid IssuerSignedItemBytes")?;
            if selected.contains(require_text(&decoded, "elementIdentifier")?) {
                kept_items.push(item.clone());
            }
        }

        if !kept_items.is_empty() {
            kept.push((name_space.clone(), Cbor::Array(kept_items)));
        }
    }

    Ok(Cbor::Map(kept))
}
