use anyhow::{bail, Context, Result};
use base64::prelude::*;
use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};

/// A single SD-JWT disclosure, keeping its original encoding so that digests and presentations
/// reproduce the issuer's bytes exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Disclosure {
    encoded: String,
    pub salt: String,
    pub kind: DisclosureKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisclosureKind {
    Property { name: String, value: Json },
    ArrayItem(Json),
}

impl Disclosure {
    pub fn parse(encoded: &str) -> Result<Self> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .context("disclosure was not valid base64url")?;
        let json: Json = serde_json::from_slice(&bytes).context("disclosure was not valid json")?;

        let Json::Array(values) = json else {
            bail!("disclosure is not an array")
        };

        let kind = match values.as_slice() {
            [_, Json::String(name), value] => DisclosureKind::Property {
                name: name.clone(),
                value: value.clone(),
            },
            [_, value] => DisclosureKind::ArrayItem(value.clone()),
            _ => bail!("disclosure must have two or three elements"),
        };

        let Some(Json::String(salt)) = values.first() else {
            bail!("disclosure salt is not a string")
        };

        Ok(Self {
            encoded: encoded.to_owned(),
            salt: salt.clone(),
            kind,
        })
    }

    /// Encodes a new object property disclosure.
    pub fn property(salt: impl Into<String>, name: impl Into<String>, value: Json) -> Self {
        let salt = salt.into();
        let name = name.into();
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(json!([salt, name, value]).to_string());
        Self {
            encoded,
            salt,
            kind: DisclosureKind::Property { name, value },
        }
    }

    /// Encodes a new array element disclosure.
    pub fn array_item(salt: impl Into<String>, value: Json) -> Self {
        let salt = salt.into();
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(json!([salt, value]).to_string());
        Self {
            encoded,
            salt,
            kind: DisclosureKind::ArrayItem(value),
        }
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            DisclosureKind::Property { name, .. } => Some(name),
            DisclosureKind::ArrayItem(_) => None,
        }
    }

    pub fn value(&self) -> &Json {
        match &self.kind {
            DisclosureKind::Property { value, .. } | DisclosureKind::ArrayItem(value) => value,
        }
    }

    /// Whether the disclosed value is itself a container of further digests.
    pub fn is_digest_container(&self) -> bool {
        self.value().get(super::SD_CLAIM).is_some()
    }

    /// The `sha-256` digest under which the issuer JWT references this disclosure.
    pub fn digest(&self) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(self.encoded.as_bytes()))
    }
}
