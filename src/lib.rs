//! Wallet-side credential exchange engine.
//!
//! This library implements the protocol machinery a holder wallet needs to obtain and present
//! credentials:
//! - [OpenID4VCI] credential issuance, with key proofs bound to a wallet unit attestation,
//! - [OpenID4VP 1.0] presentation with DCQL queries, signed request objects (`x509_hash`
//!   clients) and optionally encrypted `direct_post.jwt` responses,
//! - wallet instance and wallet unit attestation issuance from a wallet provider,
//! - ISO/IEC 18013-5 mdoc device responses, remote (ISO/IEC 18013-7) and in proximity.
//!
//! [OpenID4VCI]: <https://openid.net/specs/openid-4-verifiable-credential-issuance-1_0.html>
//! [OpenID4VP 1.0]: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html>
//!
//! # Usage
//!
//! A [`Wallet`] ties together the [`WalletConfig`] and the collaborators supplied by the
//! embedding application: an HTTP client, a signer backed by the platform key store, and a blob
//! storage.
//!
//! ```ignore
//! use openid4vc_wallet::attestation::AttestationKind;
//! use openid4vc_wallet::core::{signer::P256Signer, storage::MemoryStorage, util::ReqwestClient};
//! use openid4vc_wallet::issuance::{AccessToken, CredentialConfiguration, IssuanceFlow};
//! use openid4vc_wallet::wallet::Wallet;
//!
//! let wallet = Wallet::new(config, ReqwestClient::new()?, signer, MemoryStorage::new());
//!
//! // Attestations are obtained once and refreshed when they expire.
//! wallet.request_attestation(AttestationKind::Wia).await?;
//! wallet.request_attestation(AttestationKind::Wua).await?;
//!
//! // Issue a credential with an access token obtained through OAuth.
//! let configuration = CredentialConfiguration::from_issuer_metadata("pid", &issuer_metadata)?;
//! let flow = IssuanceFlow::new(endpoints, configuration, access_token);
//! let credential = wallet.issue_credential(flow).await?;
//!
//! // Present it to a verifier.
//! let outcome = wallet
//!     .present(&request_uri, &expected_client_id_hash, "urn:eudi:pid:1")
//!     .await?;
//! ```
//!
//! [`Wallet`]: crate::wallet::Wallet
//! [`WalletConfig`]: crate::config::WalletConfig
//!
//! # Flows
//!
//! Issuance and presentation are driven step by step through an explicit flow value
//! ([`IssuanceFlow`], [`PresentationFlow`]) that each step consumes and returns advanced. The
//! `issue_credential` and `present` methods run every step in sequence.
//!
//! [`IssuanceFlow`]: crate::issuance::IssuanceFlow
//! [`PresentationFlow`]: crate::presentation::PresentationFlow
//!
//! # Credential Formats
//!
//! - **SD-JWT VC** (`vc+sd-jwt`, `dc+sd-jwt`): see [`core::sd_jwt`].
//! - **mso_mdoc**: see [`core::iso_18013_5`] and [`core::iso_18013_7`].
//!
//! Both are handled through [`credential::Credential`], selected once from the stored format.
//!
//! [`core::sd_jwt`]: crate::core::sd_jwt
//! [`core::iso_18013_5`]: crate::core::iso_18013_5
//! [`core::iso_18013_7`]: crate::core::iso_18013_7
//! [`credential::Credential`]: crate::credential::Credential
//!
//! # Errors
//!
//! Every fallible operation returns [`Error`], whose variants tell the caller how to recover:
//! [`Error::ReauthenticationRequired`] asks for a new access token, [`Error::Security`] means
//! whatever was being verified has been discarded.

pub mod attestation;
pub mod config;
pub mod core;
pub mod credential;
mod error;
pub mod issuance;
pub mod presentation;
pub mod store;
pub mod utils;
pub mod wallet;

pub use error::{Error, Result};
