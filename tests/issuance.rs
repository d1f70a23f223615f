mod common;

use base64::prelude::*;
use common::*;
use http::Method;
use openid4vc_wallet::{
    attestation::{AttestationKind, StoredAttestation},
    core::{credential_format::CredentialFormat, signer::P256Signer},
    issuance::{
        AccessToken, CredentialConfiguration, IssuanceFlow, IssuanceStep, IssuerEndpoints,
        TokenType,
    },
    Error,
};
use p256::ecdsa::SigningKey;
use serde_json::{json, Value as Json};

const NONCE_URI: &str = "https://issuer.example.com/nonce";
const CREDENTIAL_URI: &str = "https://issuer.example.com/credential";
const JWKS_URI: &str = "https://issuer.example.com/.well-known/jwks.json";

fn issuer_key() -> SigningKey {
    SigningKey::from_slice(&[11u8; 32]).unwrap()
}

fn holder_key() -> SigningKey {
    SigningKey::from_slice(&[12u8; 32]).unwrap()
}

fn issuer_metadata() -> Json {
    json!({
        "credential_issuer": "https://issuer.example.com",
        "credential_endpoint": CREDENTIAL_URI,
        "nonce_endpoint": NONCE_URI,
        "credential_configurations_supported": {
            "pid_sd_jwt": {
                "format": "dc+sd-jwt",
                "vct": "urn:eudi:pid:1",
                "credential_metadata": {
                    "display": [{ "name": "Personal ID", "locale": "en" }],
                    "claims": [
                        { "path": ["given_name"], "display": [{ "name": "Given name" }] },
                        { "path": ["family_name"] }
                    ]
                }
            }
        }
    })
}

fn flow(token_type: TokenType) -> IssuanceFlow {
    IssuanceFlow::new(
        IssuerEndpoints {
            credential_issuer: "https://issuer.example.com".into(),
            credential_endpoint: CREDENTIAL_URI.parse().unwrap(),
            nonce_endpoint: NONCE_URI.parse().unwrap(),
            jwks_uri: None,
        },
        CredentialConfiguration::from_issuer_metadata("pid_sd_jwt", &issuer_metadata()).unwrap(),
        AccessToken {
            access_token: "access-token-1".into(),
            token_type,
            dpop_nonce: None,
        },
    )
}

fn wua(exp: i64) -> StoredAttestation {
    StoredAttestation {
        id: "wua-1".into(),
        jwt: jws(
            &SigningKey::from_slice(&[13u8; 32]).unwrap(),
            &json!({ "alg": "ES256", "typ": "key-attestation+jwt" }),
            &json!({ "iss": "https://provider.example.com", "exp": exp }),
        ),
        kind: AttestationKind::Wua,
    }
}

fn issuer(
    credential: impl Fn(&Recorded) -> http::Response<Vec<u8>> + Send + Sync + 'static,
) -> MockHttpClient {
    MockHttpClient::new()
        .route(Method::POST, NONCE_URI, |_| {
            json_response(200, json!({ "c_nonce": "c-nonce-1", "expires_in": 300 }))
        })
        .route(Method::POST, CREDENTIAL_URI, credential)
}

async fn holder_wallet(
    http_client: MockHttpClient,
    wua: Option<StoredAttestation>,
) -> TestWallet {
    let signer = P256Signer::new();
    signer.insert("credential_binding_key", holder_key()).await;
    let wallet = wallet(http_client, signer);
    if let Some(wua) = wua {
        wallet.store().put_attestation(&wua).await.unwrap();
    }
    wallet
}

#[tokio::test]
async fn credential_is_issued_and_stored() {
    let credential = pid_sd_jwt(&issuer_key(), &public_jwk(&holder_key()));
    let response = credential.clone();
    let wua = wua(now() + 3600);
    let wallet = holder_wallet(
        issuer(move |_| {
            json_response(200, json!({ "credentials": [{ "credential": response.clone() }] }))
        }),
        Some(wua.clone()),
    )
    .await;

    let stored = wallet.issue_credential(flow(TokenType::Bearer)).await.unwrap();
    assert_eq!(stored.raw_credential, credential);
    assert_eq!(stored.format, CredentialFormat::DcSdJwt);
    assert_eq!(stored.key_alias, "credential_binding_key");
    assert_eq!(stored.issued_at.unwrap().timestamp(), 1_700_000_000);
    assert_eq!(stored.expires_at.unwrap().timestamp(), 1_900_000_000);
    assert_eq!(stored.display_metadata.as_ref().unwrap()[0]["name"], "Personal ID");
    assert_eq!(
        wallet.store().credential("urn:eudi:pid:1").await.unwrap(),
        Some(stored)
    );

    let request = &wallet.http_client().requests_to(CREDENTIAL_URI)[0];
    assert_eq!(request.header("Authorization"), Some("Bearer access-token-1"));
    assert_eq!(request.header("DPoP"), None);

    let body = request.json();
    assert_eq!(body["credential_configuration_id"], "pid_sd_jwt");
    assert_eq!(body["format"], "dc+sd-jwt");
    assert_eq!(body["proof"]["proof_type"], "jwt");

    let (header, claims) = decode_jwt(body["proof"]["jwt"].as_str().unwrap());
    assert_eq!(header["typ"], "openid4vci-proof+jwt");
    assert_eq!(header["key_attestation"], wua.jwt);
    assert_eq!(header["jwk"]["x"], public_jwk(&holder_key())["x"]);
    assert_eq!(claims["iss"], CLIENT_ID);
    assert_eq!(claims["aud"], "https://issuer.example.com");
    assert_eq!(claims["nonce"], "c-nonce-1");
}

#[tokio::test]
async fn rejected_token_requires_reauthentication() {
    let wallet = holder_wallet(
        issuer(|_| json_response(401, json!({ "error": "invalid_token" }))),
        Some(wua(now() + 3600)),
    )
    .await;

    match wallet.issue_credential(flow(TokenType::Bearer)).await {
        Err(Error::ReauthenticationRequired { body }) => assert!(body.contains("invalid_token")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(
        wallet.store().credential("urn:eudi:pid:1").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn issuer_errors_are_reported_with_status() {
    let wallet = holder_wallet(
        issuer(|_| json_response(400, json!({ "error": "invalid_proof" }))),
        Some(wua(now() + 3600)),
    )
    .await;

    match wallet.issue_credential(flow(TokenType::Bearer)).await {
        Err(Error::Issuance { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_proof"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn proof_requires_a_valid_wallet_unit_attestation() {
    for wua in [None, Some(wua(now() - 10))] {
        let wallet = holder_wallet(issuer(|_| text_response(500, "")), wua).await;

        let err = wallet
            .issue_credential(flow(TokenType::Bearer))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::State(_)), "{err:?}");

        let requests = wallet.http_client().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].uri, NONCE_URI);
        assert_eq!(
            wallet.store().attestation(AttestationKind::Wua).await.unwrap(),
            None
        );
    }
}

/// A PID signed under a self-signed issuer certificate carried in `x5c`.
fn certified_pid() -> (String, Json) {
    let (key, cert_der, _) = verifier_certificate("issuer.example.com");
    let credential = pid_sd_jwt_with_header(
        &key,
        json!({
            "alg": "ES256",
            "typ": "dc+sd-jwt",
            "kid": "issuer-1",
            "x5c": [BASE64_STANDARD.encode(&cert_der)]
        }),
        &public_jwk(&holder_key()),
    );
    let mut jwk = public_jwk(&key);
    jwk["kid"] = "issuer-1".into();
    (credential, jwk)
}

fn verifying_flow() -> IssuanceFlow {
    let mut flow = flow(TokenType::Bearer);
    flow.endpoints.jwks_uri = Some(JWKS_URI.parse().unwrap());
    flow
}

#[tokio::test]
async fn received_sd_jwt_is_checked_against_issuer_jwks() {
    let (credential, jwk) = certified_pid();
    let response = credential.clone();
    let http_client = issuer(move |_| json_response(200, json!({ "credential": response.clone() })))
        .route(Method::GET, JWKS_URI, move |_| {
            json_response(200, json!({ "keys": [jwk.clone()] }))
        });
    let wallet = holder_wallet(http_client, Some(wua(now() + 3600))).await;

    let stored = wallet.issue_credential(verifying_flow()).await.unwrap();
    assert_eq!(stored.raw_credential, credential);
    assert_eq!(wallet.http_client().requests_to(JWKS_URI).len(), 1);
}

#[tokio::test]
async fn sd_jwt_from_an_unpublished_key_is_not_stored() {
    let (credential, _) = certified_pid();
    let mut other = public_jwk(&SigningKey::from_slice(&[14u8; 32]).unwrap());
    other["kid"] = "issuer-1".into();
    let http_client = issuer(move |_| json_response(200, json!({ "credential": credential.clone() })))
        .route(Method::GET, JWKS_URI, move |_| {
            json_response(200, json!({ "keys": [other.clone()] }))
        });
    let wallet = holder_wallet(http_client, Some(wua(now() + 3600))).await;

    let err = wallet.issue_credential(verifying_flow()).await.unwrap_err();
    assert!(matches!(err, Error::Security(_)), "{err:?}");
    assert_eq!(
        wallet.store().credential("urn:eudi:pid:1").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn dpop_bound_token_is_presented_with_a_proof() {
    let credential = pid_sd_jwt(&issuer_key(), &public_jwk(&holder_key()));
    let wallet = holder_wallet(
        issuer(move |_| {
            let mut response = json_response(200, json!({ "credential": credential.clone() }));
            response
                .headers_mut()
                .insert("dpop-nonce", "dpop-nonce-2".parse().unwrap());
            response
        }),
        Some(wua(now() + 3600)),
    )
    .await;

    let flow = wallet.fetch_nonce(flow(TokenType::Dpop)).await.unwrap();
    let flow = wallet.create_proof(flow).await.unwrap();
    let flow = wallet.request_credential(flow).await.unwrap();
    assert!(matches!(flow.step(), IssuanceStep::CredentialReceived { .. }));
    assert_eq!(flow.access_token.dpop_nonce.as_deref(), Some("dpop-nonce-2"));

    let request = &wallet.http_client().requests_to(CREDENTIAL_URI)[0];
    assert_eq!(request.header("Authorization"), Some("DPoP access-token-1"));

    let (header, claims) = decode_jwt(request.header("DPoP").unwrap());
    assert_eq!(header["typ"], "dpop+jwt");
    assert_eq!(claims["htm"], "POST");
    assert_eq!(claims["htu"], CREDENTIAL_URI);
    assert!(claims["ath"].is_string());
    assert!(claims["jti"].is_string());

    wallet.persist_credential(flow).await.unwrap();
    assert!(wallet
        .store()
        .credential("urn:eudi:pid:1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn steps_must_run_in_order() {
    let wallet = holder_wallet(MockHttpClient::new(), Some(wua(now() + 3600))).await;

    let err = wallet
        .request_credential(flow(TokenType::Bearer))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::State(_)), "{err:?}");

    let err = wallet
        .persist_credential(flow(TokenType::Bearer))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::State(_)), "{err:?}");
    assert!(wallet.http_client().requests().is_empty());
}
