//! Tamper-evident execution logs.
//!
//! Every execution produces one [`ExecutionLog`]. On finalization the
//! [`AuditLogger`] renders it to a Markdown body, signs the body with
//! HMAC-SHA256 under the installation key from [`SecretKeyManager`], and
//! hands the document to a [`LogSink`]. [`AuditLogger::verify`] checks a
//! persisted document against the same key.

pub mod document;
pub mod error;
pub mod key;
pub mod log;
pub mod logger;

pub use document::{LOG_CATEGORY, LogHeader};
pub use error::{AuditError, KeyError, VerificationError};
pub use key::{FileKeyStore, KeyStore, MemoryKeyStore, SecretKeyManager, SigningKey};
pub use log::{ExecutionLog, ExecutionStatus, LogStep};
pub use logger::{
    AuditLogger, FinalizedLog, LogSink, VerificationReport, VerifiedLog, sign, verify_document,
    verify_signature,
};
