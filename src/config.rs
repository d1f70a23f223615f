use std::collections::BTreeMap;

use serde::Deserialize;
use url::Url;

/// Static configuration of a wallet instance.
///
/// Embedding applications deserialize this from whatever source they use (file, remote config,
/// compiled-in JSON).
#[derive(Deserialize, Debug, Clone)]
pub struct WalletConfig {
    /// The OAuth client identifier of this wallet, used as `iss` in proofs.
    pub client_id: String,
    pub wallet_provider: WalletProviderConfig,
    #[serde(default)]
    pub keys: KeyAliases,
    /// Replaces the built-in parent to children claim table used when a credential carries no
    /// claim metadata.
    #[serde(default)]
    pub claim_groups: Option<BTreeMap<String, Vec<String>>>,
}

/// Wallet provider endpoints used for WIA and WUA issuance.
#[derive(Deserialize, Debug, Clone)]
pub struct WalletProviderConfig {
    pub base: BaseUrl,
    #[serde(default = "WalletProviderConfig::default_nonce_path")]
    pub nonce_path: String,
    #[serde(default = "WalletProviderConfig::default_wia_path")]
    pub wia_path: String,
    #[serde(default = "WalletProviderConfig::default_wua_path")]
    pub wua_path: String,
    #[serde(default = "WalletProviderConfig::default_jwks_path")]
    pub jwks_path: String,
}

impl WalletProviderConfig {
    fn default_nonce_path() -> String {
        "nonce".into()
    }

    fn default_wia_path() -> String {
        "wallet-instance-attestation".into()
    }

    fn default_wua_path() -> String {
        "wallet-unit-attestation".into()
    }

    fn default_jwks_path() -> String {
        ".well-known/jwks.json".into()
    }

    pub fn nonce_endpoint(&self) -> Result<Url, url::ParseError> {
        self.base.join(&self.nonce_path)
    }

    pub fn wia_endpoint(&self) -> Result<Url, url::ParseError> {
        self.base.join(&self.wia_path)
    }

    pub fn wua_endpoint(&self) -> Result<Url, url::ParseError> {
        self.base.join(&self.wua_path)
    }

    pub fn jwks_endpoint(&self) -> Result<Url, url::ParseError> {
        self.base.join(&self.jwks_path)
    }
}

/// Aliases of the keys held by the signer collaborator.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyAliases {
    pub wia: String,
    pub wua: String,
    /// Key that issued credentials are bound to.
    pub credential: String,
}

impl Default for KeyAliases {
    fn default() -> Self {
        Self {
            wia: "wallet_instance_key".into(),
            wua: "wallet_unit_key".into(),
            credential: "credential_binding_key".into(),
        }
    }
}

/// A url that is always a base (can be safely join()'ed with further path elements without
/// mangling).
#[derive(Deserialize, Debug, Clone, Hash, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct BaseUrl(Url);

impl std::ops::Deref for BaseUrl {
    type Target = Url;

    fn deref(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(mut url: String) -> Result<Self, Self::Error> {
        if !url.ends_with('/') {
            url += "/"
        }
        url.parse().map(Self)
    }
}
