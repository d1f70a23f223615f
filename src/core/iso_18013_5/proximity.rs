//! Proximity presentation over a device-to-reader transport (ISO/IEC 18013-5 §9).
//!
//! Session establishment and session encryption are left to the [Transport]: messages handed to
//! and received from it are plaintext `DeviceRequest` / `DeviceResponse` structures.

use anyhow::Result;
use async_trait::async_trait;
use ciborium::Value as Cbor;
use tracing::{debug, info, warn};

use crate::core::signer::WalletSigner;
use crate::Error;

use super::{
    cbor_to_bytes, device_request::parse_device_request, device_response::build_device_response,
    DeviceRequestInfo, ElementSelection, ENCODED_CBOR_TAG,
};

/// A connection to an mdoc reader, typically BLE.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<()>;

    /// Receives the next decrypted message from the reader.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Encrypts and sends a message to the reader.
    async fn send(&mut self, message: Vec<u8>) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// The encoded `EReaderKey` (a COSE_Key) from the reader's session establishment, once
    /// known.
    fn e_reader_key(&self) -> Option<Vec<u8>>;
}

/// Encodes the proximity `SessionTranscript`:
/// `[DeviceEngagementBytes, EReaderKeyBytes, null]`, where both items are tag 24 wrapped.
pub fn session_transcript(device_engagement: &[u8], e_reader_key: &[u8]) -> Result<Vec<u8>> {
    let wrapped = |bytes: &[u8]| Cbor::Tag(ENCODED_CBOR_TAG, Box::new(Cbor::Bytes(bytes.to_vec())));

    cbor_to_bytes(&Cbor::Array(vec![
        wrapped(device_engagement),
        wrapped(e_reader_key),
        Cbor::Null,
    ]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Engaged,
    Requested,
    Closed,
}

/// One request/response exchange with an mdoc reader.
pub struct ProximitySession<T> {
    transport: T,
    device_engagement: Vec<u8>,
    request: Option<DeviceRequestInfo>,
    state: State,
}

impl<T: Transport> ProximitySession<T> {
    /// `device_engagement` is the encoded `DeviceEngagement` shown to the reader.
    pub fn new(transport: T, device_engagement: Vec<u8>) -> Self {
        Self {
            transport,
            device_engagement,
            request: None,
            state: State::Engaged,
        }
    }

    pub fn device_engagement(&self) -> &[u8] {
        &self.device_engagement
    }

    pub fn request(&self) -> Option<&DeviceRequestInfo> {
        self.request.as_ref()
    }

    /// Connects to the reader and waits for its `DeviceRequest`.
    pub async fn receive_request(&mut self) -> crate::Result<DeviceRequestInfo> {
        if self.state != State::Engaged {
            return Err(Error::State(
                "a request was already received on this session".into(),
            ));
        }

        self.transport.connect().await.map_err(Error::transport)?;
        let message = self.transport.receive().await.map_err(Error::transport)?;

        let request = match parse_device_request(&message) {
            Ok(request) => request,
            Err(e) => {
                self.close().await;
                return Err(e.into());
            }
        };

        if !request.reader_auth_present {
            warn!("reader did not authenticate its request for {}", request.doc_type);
        }
        info!("received device request for {}", request.doc_type);

        self.request = Some(request.clone());
        self.state = State::Requested;
        Ok(request)
    }

    /// Answers the received request with the `selection` of elements from `issuer_signed`, then
    /// ends the session.
    pub async fn respond(
        &mut self,
        issuer_signed: &[u8],
        selection: &ElementSelection,
        signer: &(impl WalletSigner + ?Sized),
        key_alias: &str,
    ) -> crate::Result<()> {
        if self.state != State::Requested {
            return Err(Error::State("no device request to respond to".into()));
        }

        let result = self
            .send_response(issuer_signed, selection, signer, key_alias)
            .await;
        self.close().await;
        result
    }

    /// Ends the session without responding.
    pub async fn cancel(&mut self) {
        self.close().await
    }

    async fn send_response(
        &mut self,
        issuer_signed: &[u8],
        selection: &ElementSelection,
        signer: &(impl WalletSigner + ?Sized),
        key_alias: &str,
    ) -> crate::Result<()> {
        let e_reader_key = self
            .transport
            .e_reader_key()
            .ok_or_else(|| Error::transport("reader key is not known"))?;
        let transcript = session_transcript(&self.device_engagement, &e_reader_key)?;

        let response =
            build_device_response(issuer_signed, selection, &transcript, signer, key_alias)
                .await?;

        debug!("sending device response ({} bytes)", response.len());
        self.transport
            .send(response)
            .await
            .map_err(Error::transport)
    }

    async fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        if let Err(e) = self.transport.disconnect().await {
            warn!("failed to disconnect from reader: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::core::{
        iso_18013_5::{
            cbor_from_bytes, decode_credential_claims,
            device_request::test_support::device_request,
            test_support::{issuer_signed, MDL_DOCTYPE, MDL_NAMESPACE},
        },
        signer::P256Signer,
    };
    use p256::ecdsa::SigningKey;

    #[derive(Default)]
    struct MockTransport {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        connected: bool,
        disconnects: usize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        async fn receive(&mut self) -> Result<Vec<u8>> {
            self.inbox
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("reader closed the connection"))
        }

        async fn send(&mut self, message: Vec<u8>) -> Result<()> {
            self.sent.push(message);
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            self.disconnects += 1;
            Ok(())
        }

        fn e_reader_key(&self) -> Option<Vec<u8>> {
            Some(vec![0xa1, 0x01, 0x02])
        }
    }

    #[test]
    fn transcript_wraps_engagement_and_reader_key() {
        let transcript = session_transcript(&[0xa0], &[0xa1, 0x01, 0x02]).unwrap();
        assert_eq!(
            hex::encode(transcript),
            "83d81841a0d81843a10102f6"
        );
    }

    #[tokio::test]
    async fn request_is_answered_then_session_closes() {
        let transport = MockTransport {
            inbox: VecDeque::from([device_request(
                MDL_DOCTYPE,
                &[(MDL_NAMESPACE, &["given_name"])],
                None,
            )]),
            ..Default::default()
        };
        let signer = P256Signer::new();
        signer
            .insert("device", SigningKey::from_slice(&[5u8; 32]).unwrap())
            .await;

        let mut session = ProximitySession::new(transport, vec![0xa0]);
        let request = session.receive_request().await.unwrap();
        assert_eq!(request.requested_items[MDL_NAMESPACE], vec!["given_name"]);

        let selection = request
            .requested_items
            .iter()
            .map(|(ns, els)| (ns.clone(), els.iter().cloned().collect()))
            .collect();
        session
            .respond(&issuer_signed(), &selection, &signer, "device")
            .await
            .unwrap();

        assert_eq!(session.transport.disconnects, 1);
        assert!(!session.transport.connected);
        let sent = &session.transport.sent[0];
        assert!(cbor_from_bytes(sent).is_ok());
        let decoded = decode_credential_claims(sent).unwrap();
        assert_eq!(decoded.claims.keys().collect::<Vec<_>>(), vec!["given_name"]);

        let err = session
            .respond(&issuer_signed(), &selection, &signer, "device")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[tokio::test]
    async fn closed_connection_is_a_transport_error() {
        let mut session = ProximitySession::new(MockTransport::default(), vec![0xa0]);
        let err = session.receive_request().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn malformed_request_closes_the_session() {
        let transport = MockTransport {
            inbox: VecDeque::from([vec![0xa0]]),
            ..Default::default()
        };
        let mut session = ProximitySession::new(transport, vec![0xa0]);
        let err = session.receive_request().await.unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(session.transport.disconnects, 1);
    }
}
