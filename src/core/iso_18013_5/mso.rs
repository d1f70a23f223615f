use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use ciborium::Value as Cbor;
use serde_json::Value as Json;

use super::{
    cbor_from_bytes, cbor_to_json, cose, map_get, require, require_text, unwrap_encoded,
};

/// RFC 3339 date-time string.
const TAG_DATE_TIME: u64 = 0;
/// Seconds since the epoch.
const TAG_EPOCH: u64 = 1;

/// Claims of an mdoc, with the validity window from its Mobile Security Object.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMdoc {
    pub doc_type: String,
    /// Element values per namespace.
    pub elements: BTreeMap<String, BTreeMap<String, Json>>,
    /// Element values across all namespaces, with the members of object valued elements lifted
    /// one level in place of the element.
    pub claims: BTreeMap<String, Json>,
    /// `validityInfo.signed`.
    pub issued_at: Option<DateTime<Utc>>,
    /// `validityInfo.validUntil`.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Decodes the claims of an encoded `IssuerSigned` structure or of the first document of an
/// encoded `DeviceResponse`.
pub fn decode_credential_claims(bytes: &[u8]) -> Result<DecodedMdoc> {
    let value = cbor_from_bytes(bytes)?;
    let issuer_signed = issuer_signed(&value)?;
    let mso = mobile_security_object(require(issuer_signed, "issuerAuth")?)?;

    let validity = map_get(&mso, "validityInfo");
    let issued_at = validity
        .and_then(|v| map_get(v, "signed"))
        .map(date_time)
        .transpose()
        .context("invalid 'signed'")?;
    let expires_at = validity
        .and_then(|v| map_get(v, "validUntil"))
        .map(date_time)
        .transpose()
        .context("invalid 'validUntil'")?;

    let mut elements: BTreeMap<String, BTreeMap<String, Json>> = BTreeMap::new();
    let mut claims = BTreeMap::new();

    if let Some(name_spaces) = map_get(issuer_signed, "nameSpaces") {
        let name_spaces = name_spaces.as_map().context("'nameSpaces' is not a map")?;
        for (name_space, items) in name_spaces {
            let name_space = name_space
                .as_text()
                .context("namespace is not a text string")?;
            let items = items
                .as_array()
                .with_context(|| format!("items of '{name_space}' are not an array"))?;

            for item in items {
                let item = unwrap_encoded(item).context("invalid IssuerSignedItemBytes")?;
                let identifier = require_text(&item, "elementIdentifier")?.to_string();
                let value = cbor_to_json(require(&item, "elementValue")?);

                match &value {
                    Json::Object(members) => claims.extend(members.clone()),
                    _ => {
                        claims.insert(identifier.clone(), value.clone());
                    }
                }
                elements
                    .entry(name_space.to_string())
                    .or_default()
                    .insert(identifier, value);
            }
        }
    }

    Ok(DecodedMdoc {
        doc_type: require_text(&mso, "docType")?.to_string(),
        elements,
        claims,
        issued_at,
        expires_at,
    })
}

/// Finds the `IssuerSigned` structure in either a stored credential or a `DeviceResponse`.
pub(crate) fn issuer_signed(value: &Cbor) -> Result<&Cbor> {
    match map_get(value, "documents") {
        Some(documents) => {
            let document = documents
                .as_array()
                .and_then(|d| d.first())
                .context("DeviceResponse has no documents")?;
            require(document, "issuerSigned")
        }
        None => Ok(value),
    }
}

/// Decodes the Mobile Security Object carried as the payload of `issuerAuth`.
pub(crate) fn mobile_security_object(issuer_auth: &Cbor) -> Result<Cbor> {
    let (_, payload, _) = cose::split_sign1(issuer_auth).context("invalid issuerAuth")?;
    let payload = payload.context("issuerAuth has a detached payload")?;
    let payload = cbor_from_bytes(payload)?;

    match payload {
        Cbor::Tag(..) => unwrap_encoded(&payload).context("invalid MobileSecurityObjectBytes"),
        Cbor::Map(_) => Ok(payload),
        _ => bail!("issuerAuth payload is not a MobileSecurityObject"),
    }
}

fn date_time(value: &Cbor) -> Result<DateTime<Utc>> {
    match value {
        Cbor::Tag(TAG_DATE_TIME, inner) => {
            let text = inner.as_text().context("tag 0 does not wrap a text string")?;
            Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
        }
        Cbor::Tag(TAG_EPOCH, inner) => {
            let seconds = match inner.as_ref() {
                Cbor::Integer(i) => i64::try_from(*i).context("epoch out of range")?,
                Cbor::Float(f) => f.trunc() as i64,
                _ => bail!("tag 1 does not wrap a number"),
            };
            Utc.timestamp_opt(seconds, 0)
                .single()
                .context("epoch out of range")
        }
        Cbor::Text(text) => Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc)),
        _ => bail!("unsupported date-time encoding"),
    }
}
