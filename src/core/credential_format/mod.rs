use core::fmt;
use std::{borrow::Cow, str::FromStr};

use serde::{Deserialize, Serialize};

const FORMAT_VC_SD_JWT: &str = "vc+sd-jwt";
const FORMAT_DC_SD_JWT: &str = "dc+sd-jwt";
const FORMAT_MSO_MDOC: &str = "mso_mdoc";

/// Credential format identifier, as used in OpenID4VCI credential requests, issuer metadata and
/// DCQL credential queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialFormat {
    /// SD-JWT VC, under the identifier used by OpenID4VCI drafts and most deployed issuers.
    VcSdJwt,

    /// SD-JWT VC, under the identifier registered by OpenID4VP 1.0.
    DcSdJwt,

    /// The format is defined by ISO/IEC 18013-5:2021 which defines a mobile driving license (mDL)
    /// Credential in the mobile document (mdoc) format. The Credential format can be utilized
    /// with any mdoc document type.
    MsoMdoc,

    /// Formats this wallet cannot process.
    ///
    /// The value of this variant is the name of the format.
    Other(String),
}

impl CredentialFormat {
    pub fn from_name(name: Cow<str>) -> Self {
        match name.as_ref() {
            FORMAT_VC_SD_JWT => Self::VcSdJwt,
            FORMAT_DC_SD_JWT => Self::DcSdJwt,
            FORMAT_MSO_MDOC => Self::MsoMdoc,
            _ => Self::Other(name.into_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::VcSdJwt => FORMAT_VC_SD_JWT,
            Self::DcSdJwt => FORMAT_DC_SD_JWT,
            Self::MsoMdoc => FORMAT_MSO_MDOC,
            Self::Other(name) => name,
        }
    }

    pub fn is_sd_jwt(&self) -> bool {
        matches!(self, Self::VcSdJwt | Self::DcSdJwt)
    }

    /// Whether a credential held in this format can answer a query for `requested`.
    ///
    /// Both SD-JWT identifiers name the same wire format.
    pub fn satisfies(&self, requested: &CredentialFormat) -> bool {
        self == requested || (self.is_sd_jwt() && requested.is_sd_jwt())
    }
}

impl From<&str> for CredentialFormat {
    fn from(s: &str) -> Self {
        Self::from_name(Cow::Borrowed(s))
    }
}

impl From<String> for CredentialFormat {
    fn from(value: String) -> Self {
        Self::from_name(Cow::Owned(value))
    }
}

impl FromStr for CredentialFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl fmt::Display for CredentialFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl Serialize for CredentialFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CredentialFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Into::into)
    }
}
