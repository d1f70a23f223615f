use base64::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::{
    proof::{self, ProofClaims, ProofPurpose},
    signer::WalletSigner,
};
use crate::Result;

use super::{Disclosure, SdJwt};

/// Builds an SD-JWT presentation revealing `disclosures`, bound to `audience` and `nonce` by a
/// key binding JWT signed with `key_alias`.
///
/// An empty selection discloses the first disclosure of the credential.
pub async fn create_presentation(
    credential: &SdJwt,
    disclosures: &[Disclosure],
    audience: &str,
    nonce: &str,
    signer: &(impl WalletSigner + ?Sized),
    key_alias: &str,
) -> Result<String> {
    let disclosures = if disclosures.is_empty() {
        debug!("no disclosures selected, disclosing the first one");
        credential.disclosures().get(..1).unwrap_or_default()
    } else {
        disclosures
    };

    let presented = credential.serialize_with(disclosures);
    let sd_hash = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(presented.as_bytes()));

    let kb_jwt = proof::build(
        signer,
        ProofPurpose::KeyBinding,
        key_alias,
        ProofClaims::new(None, audience).with("sd_hash", sd_hash),
        Some(nonce),
    )
    .await?;

    Ok(presented + &kb_jwt)
}
