#![allow(dead_code)]

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::prelude::*;
use ciborium::Value as Cbor;
use http::{HeaderMap, Method, Request, Response};
use openid4vc_wallet::{
    config::WalletConfig,
    core::{
        iso_18013_5::{cbor_to_bytes, cose, wrap_encoded},
        sd_jwt::Disclosure,
        signer::P256Signer,
        storage::MemoryStorage,
        util::AsyncHttpClient,
    },
    wallet::Wallet,
};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};

pub const PROVIDER_BASE: &str = "https://provider.example.com/api/";
pub const CLIENT_ID: &str = "wallet-client";
pub const MDL_DOCTYPE: &str = "org.iso.18013.5.1.mDL";
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";

pub type TestWallet = Wallet<MockHttpClient, P256Signer, MemoryStorage>;

/// A request as seen by [MockHttpClient].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn json(&self) -> Json {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn form(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_bytes(&self.body).unwrap()
    }

    pub fn form_field(&self, name: &str) -> Option<String> {
        self.form()
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Handler = Box<dyn Fn(&Recorded) -> Response<Vec<u8>> + Send + Sync>;

/// Routes requests by method and exact URI to canned handlers, and records every request.
#[derive(Default)]
pub struct MockHttpClient {
    routes: Vec<(Method, String, Handler)>,
    log: Mutex<Vec<Recorded>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        method: Method,
        uri: &str,
        handler: impl Fn(&Recorded) -> Response<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.routes.push((method, uri.to_string(), Box::new(handler)));
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_to(&self, uri: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.uri == uri)
            .collect()
    }
}

#[async_trait]
impl AsyncHttpClient for MockHttpClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let (parts, body) = request.into_parts();
        let recorded = Recorded {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body,
        };

        let (_, _, handler) = self
            .routes
            .iter()
            .find(|(method, uri, _)| *method == recorded.method && *uri == recorded.uri)
            .with_context(|| format!("no route for {} {}", recorded.method, recorded.uri))?;
        let response = handler(&recorded);

        self.log.lock().unwrap().push(recorded);
        Ok(response)
    }
}

pub fn json_response(status: u16, body: Json) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(serde_json::to_vec(&body).unwrap())
        .unwrap()
}

pub fn text_response(status: u16, body: &str) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .body(body.as_bytes().to_vec())
        .unwrap()
}

pub fn config() -> WalletConfig {
    serde_json::from_value(json!({
        "client_id": CLIENT_ID,
        "wallet_provider": { "base": PROVIDER_BASE }
    }))
    .unwrap()
}

pub fn wallet(http_client: MockHttpClient, signer: P256Signer) -> TestWallet {
    Wallet::new(config(), http_client, signer, MemoryStorage::new())
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn b64url(bytes: impl AsRef<[u8]>) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Signs `claims` as an ES256 compact JWS.
pub fn jws(key: &SigningKey, header: &Json, claims: &Json) -> String {
    let signing_input = format!(
        "{}.{}",
        b64url(header.to_string()),
        b64url(claims.to_string())
    );
    let signature: Signature = key.sign(signing_input.as_bytes());
    format!("{signing_input}.{}", b64url(signature.to_bytes()))
}

pub fn decode_jwt(jwt: &str) -> (Json, Json) {
    let mut parts = jwt.split('.');
    let mut segment = || -> Json {
        serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(parts.next().unwrap()).unwrap())
            .unwrap()
    };
    (segment(), segment())
}

pub fn public_jwk(key: &SigningKey) -> Json {
    let pk: p256::PublicKey = key.verifying_key().into();
    serde_json::from_str(&pk.to_jwk_string()).unwrap()
}

/// A self-signed P-256 certificate, its key and the base64url SHA-256 of its DER encoding.
pub fn verifier_certificate(domain: &str) -> (SigningKey, Vec<u8>, String) {
    use p256::pkcs8::DecodePrivateKey;
    use rcgen::{CertificateParams, DnType, KeyPair, SanType};

    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "Test Verifier");
    params.subject_alt_names = vec![SanType::DnsName(domain.to_string().try_into().unwrap())];
    let cert_der = params.self_signed(&key_pair).unwrap().der().to_vec();

    let signing_key = SigningKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
    let hash = b64url(Sha256::digest(&cert_der));
    (signing_key, cert_der, hash)
}

/// An SD-JWT VC with `given_name`, `family_name` and a recursively disclosed `address`.
pub fn pid_sd_jwt(issuer_key: &SigningKey, holder_jwk: &Json) -> String {
    pid_sd_jwt_with_header(
        issuer_key,
        json!({ "alg": "ES256", "typ": "dc+sd-jwt" }),
        holder_jwk,
    )
}

pub fn pid_sd_jwt_with_header(issuer_key: &SigningKey, header: Json, holder_jwk: &Json) -> String {
    let given_name = Disclosure::property("salt-1", "given_name", json!("Erika"));
    let family_name = Disclosure::property("salt-2", "family_name", json!("Mustermann"));
    let street = Disclosure::property("salt-3", "street_address", json!("Heidestrasse 17"));
    let locality = Disclosure::property("salt-4", "locality", json!("Koeln"));
    let address = Disclosure::property(
        "salt-5",
        "address",
        json!({ "_sd": [street.digest(), locality.digest()] }),
    );

    let issuer_jwt = jws(
        issuer_key,
        &header,
        &json!({
            "iss": "https://issuer.example.com",
            "vct": "urn:eudi:pid:1",
            "iat": 1_700_000_000,
            "exp": 1_900_000_000,
            "_sd_alg": "sha-256",
            "_sd": [given_name.digest(), family_name.digest(), address.digest()],
            "cnf": { "jwk": holder_jwk }
        }),
    );

    let mut sd_jwt = issuer_jwt;
    for disclosure in [&given_name, &family_name, &address, &street, &locality] {
        sd_jwt.push('~');
        sd_jwt.push_str(disclosure.encoded());
    }
    sd_jwt.push('~');
    sd_jwt
}

fn text(s: &str) -> Cbor {
    Cbor::Text(s.to_string())
}

fn issuer_signed_item(digest_id: u8, identifier: &str, value: Cbor) -> Cbor {
    wrap_encoded(&Cbor::Map(vec![
        (text("digestID"), Cbor::Integer(digest_id.into())),
        (text("random"), Cbor::Bytes(vec![digest_id; 16])),
        (text("elementIdentifier"), text(identifier)),
        (text("elementValue"), value),
    ]))
    .unwrap()
}

/// An mDL `IssuerSigned` structure with three data elements.
pub fn mdl_issuer_signed(issuer_key: &SigningKey) -> Vec<u8> {
    let mso = Cbor::Map(vec![
        (text("version"), text("1.0")),
        (text("digestAlgorithm"), text("SHA-256")),
        (text("valueDigests"), Cbor::Map(vec![])),
        (text("docType"), text(MDL_DOCTYPE)),
        (
            text("validityInfo"),
            Cbor::Map(vec![
                (text("signed"), Cbor::Tag(1, Box::new(Cbor::Integer(1_700_000_000.into())))),
                (text("validFrom"), Cbor::Tag(1, Box::new(Cbor::Integer(1_700_000_000.into())))),
                (
                    text("validUntil"),
                    Cbor::Tag(0, Box::new(text("2030-01-01T00:00:00Z"))),
                ),
            ]),
        ),
    ]);

    let payload = cbor_to_bytes(&wrap_encoded(&mso).unwrap()).unwrap();
    let protected = cose::es256_protected_header().unwrap();
    let signature: Signature = issuer_key.sign(&cose::sig_structure(&protected, &payload).unwrap());

    let issuer_signed = Cbor::Map(vec![
        (
            text("nameSpaces"),
            Cbor::Map(vec![(
                text(MDL_NAMESPACE),
                Cbor::Array(vec![
                    issuer_signed_item(0, "family_name", text("Mustermann")),
                    issuer_signed_item(1, "given_name", text("Erika")),
                    issuer_signed_item(2, "age_over_18", Cbor::Bool(true)),
                ]),
            )]),
        ),
        (
            text("issuerAuth"),
            Cbor::Array(vec![
                Cbor::Bytes(protected),
                Cbor::Map(vec![]),
                Cbor::Bytes(payload),
                Cbor::Bytes(signature.to_bytes().to_vec()),
            ]),
        ),
    ]);
    cbor_to_bytes(&issuer_signed).unwrap()
}
