//! ISO/IEC 18013-5 mdoc structures.
//!
//! Structures are handled as [ciborium::Value] trees rather than typed models so that every
//! tag-24 wrapped item the issuer produced (`IssuerSignedItemBytes`, `MobileSecurityObjectBytes`)
//! is carried through unchanged: re-encoding a typed model does not reproduce the issuer's bytes,
//! and the issuer's digests are computed over those bytes.

use anyhow::{bail, Context, Result};
use base64::prelude::*;
use ciborium::Value as Cbor;
use serde::Serialize;
use serde_json::Value as Json;

pub mod cose;
pub mod device_request;
pub mod device_response;
pub mod mso;
pub mod proximity;

pub use device_request::{parse_device_request, DeviceRequestInfo};
pub use device_response::{build_device_response, ElementSelection};
pub use mso::{decode_credential_claims, DecodedMdoc};

/// CBOR tag of an embedded, encoded data item (`#6.24(bstr .cbor X)`).
pub const ENCODED_CBOR_TAG: u64 = 24;

pub fn cbor_to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

pub fn cbor_from_bytes(bytes: &[u8]) -> Result<Cbor> {
    ciborium::from_reader(bytes).context("invalid CBOR")
}

/// Looks up a text key in a CBOR map.
pub fn map_get<'a>(map: &'a Cbor, key: &str) -> Option<&'a Cbor> {
    map.as_map()?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Like [map_get], failing when the key is missing.
pub fn require<'a>(map: &'a Cbor, key: &str) -> Result<&'a Cbor> {
    map_get(map, key).with_context(|| format!("'{key}' is missing"))
}

pub fn require_text<'a>(map: &'a Cbor, key: &str) -> Result<&'a str> {
    require(map, key)?
        .as_text()
        .with_context(|| format!("'{key}' is not a text string"))
}

/// Decodes the data item inside `#6.24(bstr)`.
pub fn unwrap_encoded(value: &Cbor) -> Result<Cbor> {
    match value {
        Cbor::Tag(ENCODED_CBOR_TAG, inner) => match inner.as_ref() {
            Cbor::Bytes(bytes) => cbor_from_bytes(bytes),
            _ => bail!("tag 24 does not wrap a byte string"),
        },
        _ => bail!("expected a tag 24 encoded data item"),
    }
}

/// Encodes `value` and wraps it as `#6.24(bstr)`.
pub fn wrap_encoded(value: &Cbor) -> Result<Cbor> {
    Ok(Cbor::Tag(
        ENCODED_CBOR_TAG,
        Box::new(Cbor::Bytes(cbor_to_bytes(value)?)),
    ))
}

pub(crate) fn text(s: impl Into<String>) -> Cbor {
    Cbor::Text(s.into())
}

/// Renders a CBOR data element as JSON. Byte strings become base64url text and tags other than
/// tag 24 are dropped.
pub fn cbor_to_json(value: &Cbor) -> Json {
    match value {
        Cbor::Integer(i) => {
            let i = i128::from(*i);
            i64::try_from(i)
                .map(Json::from)
                .or_else(|_| u64::try_from(i).map(Json::from))
                .unwrap_or_else(|_| Json::from(i.to_string()))
        }
        Cbor::Bytes(bytes) => Json::String(BASE64_URL_SAFE_NO_PAD.encode(bytes)),
        Cbor::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Cbor::Text(s) => Json::String(s.clone()),
        Cbor::Bool(b) => Json::Bool(*b),
        Cbor::Null => Json::Null,
        Cbor::Tag(ENCODED_CBOR_TAG, _) => unwrap_encoded(value)
            .map(|inner| cbor_to_json(&inner))
            .unwrap_or(Json::Null),
        Cbor::Tag(_, inner) => cbor_to_json(inner),
        Cbor::Array(items) => Json::Array(items.iter().map(cbor_to_json).collect()),
        Cbor::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Cbor::Text(s) => s.clone(),
                        other => cbor_to_json(other).to_string(),
                    };
                    (key, cbor_to_json(v))
                })
                .collect(),
        ),
        _ => Json::Null,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A self-contained `IssuerSigned` with two namespaces, signed by a throwaway issuer key.

    use super::*;
    use crate::core::iso_18013_5::cose;
    use p256::ecdsa::{signature::Signer, Signature, SigningKey};

    pub const MDL_DOCTYPE: &str = "org.iso.18013.5.1.mDL";
    pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";
    pub const AAMVA_NAMESPACE: &str = "org.iso.18013.5.1.aamva";

    fn item(digest_id: i64, identifier: &str, value: Cbor) -> Cbor {
        wrap_encoded(&Cbor::Map(vec![
            (text("digestID"), Cbor::Integer(digest_id.into())),
            (text("random"), Cbor::Bytes(vec![digest_id as u8; 16])),
            (text("elementIdentifier"), text(identifier)),
            (text("elementValue"), value),
        ]))
        .unwrap()
    }

    pub fn mso(signed: Cbor, valid_until: Cbor) -> Cbor {
        Cbor::Map(vec![
            (text("version"), text("1.0")),
            (text("digestAlgorithm"), text("SHA-256")),
            (text("valueDigests"), Cbor::Map(vec![])),
            (text("docType"), text(MDL_DOCTYPE)),
            (
                text("validityInfo"),
                Cbor::Map(vec![
                    (text("signed"), signed.clone()),
                    (text("validFrom"), signed),
                    (text("validUntil"), valid_until),
                ]),
            ),
        ])
    }

    pub fn issuer_signed_with(mso: Cbor) -> Vec<u8> {
        let issuer_key = SigningKey::from_slice(&[9u8; 32]).unwrap();
        let payload = cbor_to_bytes(&wrap_encoded(&mso).unwrap()).unwrap();
        let protected = cose::es256_protected_header().unwrap();
        let to_sign = cose::sig_structure(&protected, &payload).unwrap();
        let signature: Signature = issuer_key.sign(&to_sign);

        let issuer_auth = Cbor::Array(vec![
            Cbor::Bytes(protected),
            Cbor::Map(vec![(Cbor::Integer(33.into()), Cbor::Bytes(vec![0x30]))]),
            Cbor::Bytes(payload),
            Cbor::Bytes(signature.to_bytes().to_vec()),
        ]);

        let issuer_signed = Cbor::Map(vec![
            (
                text("nameSpaces"),
                Cbor::Map(vec![
                    (
                        text(MDL_NAMESPACE),
                        Cbor::Array(vec![
                            item(0, "family_name", text("Mustermann")),
                            item(1, "given_name", text("Erika")),
                            item(
                                2,
                                "birth_date",
                                Cbor::Tag(1004, Box::new(text("1964-08-12"))),
                            ),
                            item(
                                3,
                                "resident_address",
                                Cbor::Map(vec![
                                    (text("street"), text("Heidestrasse 17")),
                                    (text("city"), text("Koeln")),
                                ]),
                            ),
                        ]),
                    ),
                    (
                        text(AAMVA_NAMESPACE),
                        Cbor::Array(vec![item(4, "organ_donor", Cbor::Integer(1.into()))]),
                    ),
                ]),
            ),
            (text("issuerAuth"), issuer_auth),
        ]);

        cbor_to_bytes(&issuer_signed).unwrap()
    }

    pub fn issuer_signed() -> Vec<u8> {
        issuer_signed_with(mso(
            Cbor::Tag(0, Box::new(text("2024-01-15T10:00:00Z"))),
            Cbor::Tag(0, Box::new(text("2029-01-15T10:00:00Z"))),
        ))
    }
}
