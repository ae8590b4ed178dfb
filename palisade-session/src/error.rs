//! Error taxonomy for the session identity engine.

use std::fmt;

use palisade_envelope::{DecryptionError, EncryptionError, KdfError, SignatureError};

// ---------------------------------------------------------------------------
// Top-level session error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session context is installed; call `create_session` or
    /// `start_session` first.
    SessionNotInitialized,
    /// The session store delegate is missing.
    DatabaseNotInitialized,
    /// The transport delegate is missing.
    TransportNotInitialized,
    /// A signed configuration entry failed verification.
    InvalidSignature,
    /// A device entry is malformed or refers to an unknown device.
    InvalidDeviceIdentity(String),
    /// The peer published no usable pre-keys for a device.
    DrainedKeys,
    /// Sealed material could not be opened.
    SessionDecryptionError,
    /// Material could not be sealed.
    SessionEncryptionError,
    /// The password salt is unusable.
    SaltError,
    /// The local or remote configuration is internally inconsistent.
    ConfigurationError(String),
    /// The session store failed an operation.
    DatabaseError(String),
    /// The transport delegate failed an operation.
    TransportError(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotInitialized => write!(f, "session not initialized"),
            Self::DatabaseNotInitialized => write!(f, "session store not configured"),
            Self::TransportNotInitialized => write!(f, "transport not configured"),
            Self::InvalidSignature => {
                write!(f, "peer's configuration is tampered or outdated")
            }
            Self::InvalidDeviceIdentity(msg) => write!(f, "invalid device identity: {}", msg),
            Self::DrainedKeys => write!(f, "peer has no usable pre-keys, retry later"),
            Self::SessionDecryptionError => write!(f, "session decryption failed"),
            Self::SessionEncryptionError => write!(f, "session encryption failed"),
            Self::SaltError => write!(f, "invalid salt"),
            Self::ConfigurationError(msg) => write!(f, "configuration error: {}", msg),
            Self::DatabaseError(msg) => write!(f, "store error: {}", msg),
            Self::TransportError(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

// ---------------------------------------------------------------------------
// Conversions from the envelope layer (never leak primitive detail)
// ---------------------------------------------------------------------------

impl From<EncryptionError> for SessionError {
    fn from(_: EncryptionError) -> Self {
        Self::SessionEncryptionError
    }
}

impl From<DecryptionError> for SessionError {
    fn from(_: DecryptionError) -> Self {
        Self::SessionDecryptionError
    }
}

impl From<SignatureError> for SessionError {
    fn from(_: SignatureError) -> Self {
        Self::InvalidSignature
    }
}

impl From<KdfError> for SessionError {
    fn from(e: KdfError) -> Self {
        match e {
            KdfError::Salt => Self::SaltError,
            KdfError::Derive => Self::SessionEncryptionError,
        }
    }
}

impl SessionError {
    /// Whether this error must abort a refresh call outright (as opposed to
    /// degrading to the best-effort pre-refresh result).
    pub(crate) fn aborts_refresh(&self) -> bool {
        matches!(self, Self::InvalidSignature | Self::DrainedKeys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_messages() {
        assert_eq!(
            SessionError::InvalidSignature.to_string(),
            "peer's configuration is tampered or outdated"
        );
        assert_eq!(
            SessionError::DrainedKeys.to_string(),
            "peer has no usable pre-keys, retry later"
        );
    }

    #[test]
    fn envelope_errors_fold_into_taxonomy() {
        assert_eq!(
            SessionError::from(DecryptionError),
            SessionError::SessionDecryptionError
        );
        assert_eq!(
            SessionError::from(KdfError::Salt),
            SessionError::SaltError
        );
        assert_eq!(
            SessionError::from(SignatureError),
            SessionError::InvalidSignature
        );
    }
}
