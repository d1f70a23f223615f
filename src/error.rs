use thiserror::Error as ThisError;

/// Errors surfaced by the credential exchange engine.
///
/// Every variant is terminal for the flow invocation that produced it.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Malformed CBOR, JSON or JWT structure.
    #[error("format error: {0}")]
    Format(String),

    /// Signature, hash or key mismatch. Whatever was being verified has been discarded.
    #[error("security error: {0}")]
    Security(String),

    /// The signer could not use the requested key.
    ///
    /// This may be recoverable by re-authenticating the user to the key store.
    #[error("signing error: {0}")]
    Signing(String),

    /// A JWT was requested without a claim required for its purpose.
    #[error("missing or invalid claim: {0}")]
    Claim(String),

    /// The credential issuer or wallet provider answered with a non-success status.
    #[error("issuance request failed (status: {status}): {body}")]
    Issuance { status: u16, body: String },

    /// The verifier answered with a non-success status.
    #[error("presentation request failed (status: {status}): {body}")]
    Presentation { status: u16, body: String },

    /// The access token was rejected; the caller must clear it and restart authorization.
    #[error("access token rejected, re-authentication required: {body}")]
    ReauthenticationRequired { body: String },

    /// An operation was invoked before one of its prerequisites was met.
    #[error("invalid state: {0}")]
    State(String),

    /// The HTTP collaborator failed before a response was received.
    #[error("http error: {0}")]
    Http(String),

    /// The proximity transport failed or the reader ended the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn format(err: impl std::fmt::Display) -> Self {
        Self::Format(format!("{err:#}"))
    }

    pub(crate) fn security(err: impl std::fmt::Display) -> Self {
        Self::Security(format!("{err:#}"))
    }

    pub(crate) fn signing(err: impl std::fmt::Display) -> Self {
        Self::Signing(format!("{err:#}"))
    }

    pub(crate) fn http(err: impl std::fmt::Display) -> Self {
        Self::Http(format!("{err:#}"))
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(format!("{err:#}"))
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::format(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::format(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Self::format(err)
    }
}
