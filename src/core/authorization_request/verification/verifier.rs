use anyhow::{bail, Context, Error, Result};
use p256::ecdsa::signature::Verifier as _;
use serde_json::Value as Json;
use x509_cert::spki::SubjectPublicKeyInfoRef;

pub trait Verifier: Sized {
    /// Construct a [Verifier] from [SubjectPublicKeyInfoRef].
    ///
    /// ## Params
    /// * `spki` - the public key information necessary to construct a [Verifier].
    /// * `algorithm` - the value taken from the `alg` header of the JWT, to hint at what curve should be used by the [Verifier].
    fn from_spki(spki: SubjectPublicKeyInfoRef<'_>, algorithm: String) -> Result<Self>;

    /// Construct a [Verifier] from a public JWK, as found in a JWKS document.
    fn from_jwk(jwk: &Json, algorithm: String) -> Result<Self>;

    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P256Verifier(p256::ecdsa::VerifyingKey);

impl P256Verifier {
    pub fn verifying_key(&self) -> &p256::ecdsa::VerifyingKey {
        &self.0
    }
}

impl Verifier for P256Verifier {
    fn from_spki(spki: SubjectPublicKeyInfoRef<'_>, algorithm: String) -> Result<Self> {
        if algorithm != "ES256" {
            bail!("P256Verifier cannot verify JWTs signed with '{algorithm}'")
        }
        spki.try_into().map(Self).map_err(Error::from)
    }

    fn from_jwk(jwk: &Json, algorithm: String) -> Result<Self> {
        if algorithm != "ES256" {
            bail!("P256Verifier cannot verify JWTs signed with '{algorithm}'")
        }
        let public_members = serde_json::json!({
            "kty": jwk.get("kty"),
            "crv": jwk.get("crv"),
            "x": jwk.get("x"),
            "y": jwk.get("y"),
        });
        let pk = p256::PublicKey::from_jwk_str(&public_members.to_string())
            .context("JWK is not a P-256 public key")?;
        Ok(Self(pk.into()))
    }

    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<()> {
        let signature = p256::ecdsa::Signature::from_slice(signature)?;
        self.0.verify(payload, &signature).map_err(Error::from)
    }
}
