use crate::{
    config::WalletConfig,
    core::{sd_jwt::ClaimGroups, signer::WalletSigner, storage::Storage, util::AsyncHttpClient},
    store::CredentialStore,
};

/// A wallet instance: its configuration and the collaborators every flow runs against.
///
/// Attestation issuance, credential issuance and presentation are implemented on this type in
/// the [attestation](crate::attestation), [issuance](crate::issuance) and
/// [presentation](crate::presentation) modules.
#[derive(Debug)]
pub struct Wallet<H, W, S> {
    config: WalletConfig,
    http_client: H,
    signer: W,
    store: CredentialStore<S>,
    claim_groups: ClaimGroups,
}

impl<H, W, S> Wallet<H, W, S>
where
    H: AsyncHttpClient,
    W: WalletSigner,
    S: Storage,
{
    pub fn new(config: WalletConfig, http_client: H, signer: W, storage: S) -> Self {
        let claim_groups = config
            .claim_groups
            .clone()
            .map(ClaimGroups::from)
            .unwrap_or_default();
        Self {
            config,
            http_client,
            signer,
            store: CredentialStore::new(storage),
            claim_groups,
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn http_client(&self) -> &H {
        &self.http_client
    }

    pub fn signer(&self) -> &W {
        &self.signer
    }

    pub fn store(&self) -> &CredentialStore<S> {
        &self.store
    }

    /// Parent to children claim table used for credentials without claim metadata.
    pub fn claim_groups(&self) -> &ClaimGroups {
        &self.claim_groups
    }
}
