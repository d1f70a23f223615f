use serde_json::Value as Json;
use tracing::{debug, info};
use url::Url;

use crate::core::{
    authorization_request::verification::verifier::{P256Verifier, Verifier},
    jwt,
    util::AsyncHttpClient,
};
use crate::{Error, Result};

use super::SdJwt;

/// Verifies the issuer signature of an SD-JWT.
///
/// The key certified by the leaf of the issuer JWT's `x5c` chain must also be published in the
/// issuer's JWKS: the entry named by `kid` when the header carries one, otherwise any EC P-256
/// entry. Every disclosure must be referenced by a digest of the issuer JWT.
pub async fn verify(
    sd_jwt: &str,
    jwks_uri: &Url,
    http_client: &(impl AsyncHttpClient + ?Sized),
) -> Result<()> {
    let sd_jwt = SdJwt::parse(sd_jwt)?;
    let header = sd_jwt.issuer_header()?;
    let alg = jwt::algorithm(&header)?;

    let (_, leaf) = jwt::x5c_leaf(&header)?;
    let certified: P256Verifier = jwt::leaf_verifier(&leaf, alg.clone()).map_err(Error::security)?;

    let keys = jwt::fetch_jwks(http_client, jwks_uri).await?;
    let kid = header.get("kid").and_then(Json::as_str);

    let published = jwt::candidate_jwks(&keys, kid)
        .filter_map(|key| P256Verifier::from_jwk(&Json::Object(key.clone()), alg.clone()).ok())
        .any(|verifier| verifier == certified);

    if !published {
        return Err(Error::Security(format!(
            "the x5c certified issuer key is not published in {jwks_uri}"
        )));
    }

    jwt::verify_signature(&certified, sd_jwt.issuer_jwt()).map_err(Error::security)?;

    let unreferenced = sd_jwt
        .locate_disclosures()?
        .into_iter()
        .filter(|(path, _)| path.is_none())
        .count();
    if unreferenced > 0 {
        return Err(Error::Security(format!(
            "{unreferenced} disclosures are not referenced by the issuer jwt"
        )));
    }

    debug!("issuer key matched jwks entry (kid: {kid:?})");
    info!("verified sd-jwt issued by {:?}", sd_jwt.issuer_claims()?.get("iss"));
    Ok(())
}
