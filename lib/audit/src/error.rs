//! Error types for the audit crate.

use std::fmt;

/// Errors from signing key retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key store could not be read or written.
    Io { path: String, reason: String },
    /// The persisted key is not a 32-byte hex value.
    Corrupt { reason: String },
    /// A writer panicked while holding the in-memory key store.
    Poisoned,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, reason } => write!(f, "signing key store '{path}': {reason}"),
            Self::Corrupt { reason } => write!(f, "persisted signing key is corrupt: {reason}"),
            Self::Poisoned => f.write_str("signing key store lock poisoned"),
        }
    }
}

impl std::error::Error for KeyError {}

/// Errors from finalizing and persisting an execution log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// The signing key was unavailable.
    Key(KeyError),
    /// The log already reached a terminal status.
    AlreadyFinalized { execution_id: String },
    /// The log header could not be rendered.
    RenderFailed { reason: String },
    /// The log sink refused the document.
    PersistFailed { reason: String },
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(e) => write!(f, "{e}"),
            Self::AlreadyFinalized { execution_id } => {
                write!(f, "execution log {execution_id} is already finalized")
            }
            Self::RenderFailed { reason } => write!(f, "failed to render execution log: {reason}"),
            Self::PersistFailed { reason } => {
                write!(f, "failed to persist execution log: {reason}")
            }
        }
    }
}

impl std::error::Error for AuditError {}

impl From<KeyError> for AuditError {
    fn from(e: KeyError) -> Self {
        Self::Key(e)
    }
}

/// Reasons a log document fails verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The header carries no signature.
    SignatureAbsent,
    /// The signature does not match the body.
    SignatureMismatch,
    /// The document cannot be parsed as a log.
    Malformed { reason: String },
    /// The signing key could not be loaded.
    KeyUnavailable { reason: String },
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureAbsent => write!(f, "no signature present"),
            Self::SignatureMismatch => write!(f, "signature does not match log content"),
            Self::Malformed { reason } => write!(f, "malformed log document: {reason}"),
            Self::KeyUnavailable { reason } => write!(f, "signing key unavailable: {reason}"),
        }
    }
}

impl std::error::Error for VerificationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_mismatch_are_distinct() {
        assert_ne!(
            VerificationError::SignatureAbsent.to_string(),
            VerificationError::SignatureMismatch.to_string()
        );
        assert_eq!(
            VerificationError::SignatureAbsent.to_string(),
            "no signature present"
        );
    }

    #[test]
    fn audit_error_passes_key_message_through() {
        let key = KeyError::Corrupt {
            reason: "odd length".to_string(),
        };
        assert_eq!(AuditError::from(key.clone()).to_string(), key.to_string());
    }
}
