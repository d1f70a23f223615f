//! The COSE_Sign1 subset used for mdoc device authentication (RFC 9052).

use anyhow::{bail, Context, Result};
use ciborium::Value as Cbor;

use crate::core::{jwt::raw_signature, signer::WalletSigner};

use super::{cbor_to_bytes, text};

/// COSE header label `alg`.
const HEADER_ALG: i64 = 1;
/// COSE algorithm identifier for ES256.
const ALG_ES256: i64 = -7;

/// The encoded protected header `{1: -7}`.
pub fn es256_protected_header() -> Result<Vec<u8>> {
    cbor_to_bytes(&Cbor::Map(vec![(
        Cbor::Integer(HEADER_ALG.into()),
        Cbor::Integer(ALG_ES256.into()),
    )]))
}

/// The encoded `Sig_structure` for a COSE_Sign1 without external AAD.
pub fn sig_structure(protected: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    cbor_to_bytes(&Cbor::Array(vec![
        text("Signature1"),
        Cbor::Bytes(protected.to_vec()),
        Cbor::Bytes(vec![]),
        Cbor::Bytes(payload.to_vec()),
    ]))
}

/// Signs `detached_payload` and returns a COSE_Sign1 with a null payload.
///
/// The signature is the 64 byte `r || s` concatenation COSE requires, whatever encoding the
/// signer produced.
pub async fn sign_detached(
    signer: &(impl WalletSigner + ?Sized),
    key_alias: &str,
    detached_payload: &[u8],
) -> crate::Result<Cbor> {
    let protected = es256_protected_header()?;
    let to_sign = sig_structure(&protected, detached_payload)?;

    let signature = signer
        .sign(key_alias, &to_sign)
        .await
        .map_err(|e| crate::Error::signing(format!("device authentication: {e:#}")))?;
    let signature = raw_signature(signature).map_err(crate::Error::signing)?;

    Ok(Cbor::Array(vec![
        Cbor::Bytes(protected),
        Cbor::Map(vec![]),
        Cbor::Null,
        Cbor::Bytes(signature),
    ]))
}

/// Splits a COSE_Sign1 into its protected header bytes, payload (if attached) and signature.
pub fn split_sign1(sign1: &Cbor) -> Result<(&[u8], Option<&[u8]>, &[u8])> {
    let parts = match sign1 {
        Cbor::Tag(18, inner) => inner.as_array(),
        other => other.as_array(),
    }
    .context("COSE_Sign1 is not an array")?;

    let [protected, _unprotected, payload, signature] = parts.as_slice() else {
        bail!("COSE_Sign1 must have 4 elements, found {}", parts.len())
    };

    let protected = protected
        .as_bytes()
        .context("COSE_Sign1 protected header is not a byte string")?;
    let payload = match payload {
        Cbor::Null => None,
        Cbor::Bytes(bytes) => Some(bytes.as_slice()),
        _ => bail!("COSE_Sign1 payload is neither a byte string nor null"),
    };
    let signature = signature
        .as_bytes()
        .context("COSE_Sign1 signature is not a byte string")?;

    Ok((protected, payload, signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signer::P256Signer;
    use p256::ecdsa::{signature::Verifier, Signature, SigningKey};

    #[test]
    fn protected_header_is_es256() {
        assert_eq!(es256_protected_header().unwrap(), vec![0xa1, 0x01, 0x26]);
    }

    #[tokio::test]
    async fn detached_signature_verifies_over_sig_structure() {
        let key = SigningKey::from_slice(&[3u8; 32]).unwrap();
        let verifying_key = *key.verifying_key();
        let signer = P256Signer::new();
        signer.insert("device", key).await;

        let sign1 = sign_detached(&signer, "device", b"payload").await.unwrap();
        let (protected, payload, signature) = split_sign1(&sign1).unwrap();

        assert!(payload.is_none());
        assert_eq!(sign1.as_array().unwrap()[1], Cbor::Map(vec![]));
        assert_eq!(signature.len(), 64);

        let to_verify = sig_structure(protected, b"payload").unwrap();
        let signature = Signature::from_slice(signature).unwrap();
        verifying_key.verify(&to_verify, &signature).unwrap();
    }

    #[tokio::test]
    async fn unknown_key_is_a_signing_error() {
        let signer = P256Signer::new();
        let err = sign_detached(&signer, "missing", b"x").await.unwrap_err();
        assert!(matches!(err, crate::Error::Signing(_)));
    }
}
