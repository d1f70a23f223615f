use base64::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::{jwt, proof::ES256};
use crate::{Error, Result};

use super::verifier::Verifier;

/// Verifies a request object signed by an `x509_hash` client.
///
/// The JWT must carry an `x5c` chain, be signed with ES256 by the key of the leaf certificate,
/// and the base64url SHA-256 hash of the leaf's DER encoding must equal `expected_hash`. The
/// hash comparison is what binds the signer to the client: a valid signature alone is not
/// sufficient.
///
/// The chain above the leaf is not validated.
pub fn validate<V: Verifier>(request_jwt: &str, expected_hash: &str) -> Result<()> {
    let (header, _) = jwt::decode_unverified(request_jwt)?;

    let alg = jwt::algorithm(&header)?;
    if alg != ES256 {
        return Err(Error::Security(format!(
            "request was signed with unsupported algorithm: {alg}"
        )));
    }

    if !header.contains_key("x5c") {
        return Err(Error::Security("request object has no 'x5c' header".into()));
    }
    let (leaf_der, leaf) = jwt::x5c_leaf(&header)?;

    let verifier: V = jwt::leaf_verifier(&leaf, alg).map_err(Error::security)?;
    jwt::verify_signature(&verifier, request_jwt)
        .map_err(|e| Error::security(e.context("request signature could not be verified")))?;

    let computed_hash = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(&leaf_der));
    debug!("x509_hash verification: expected='{expected_hash}', computed='{computed_hash}'");

    if computed_hash != expected_hash {
        return Err(Error::Security(format!(
            "client_id hash '{expected_hash}' does not match certificate hash '{computed_hash}'"
        )));
    }

    Ok(())
}
