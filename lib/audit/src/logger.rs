//! The audit logger: builds, signs, persists and verifies execution logs.

use crate::document::{LogHeader, parse_document, render_body, render_document};
use crate::error::{AuditError, VerificationError};
use crate::key::{SecretKeyManager, SigningKey};
use crate::log::{ExecutionLog, ExecutionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rootcause::prelude::Report;
use sha2::Sha256;
use std::path::PathBuf;
use std::sync::Arc;
use taskward_core::TaskId;

type HmacSha256 = Hmac<Sha256>;

/// Durable destination for finalized log documents.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persists one finalized document, returning where it was written.
    async fn persist(&self, log: &ExecutionLog, document: &str) -> Result<PathBuf, AuditError>;
}

/// Computes the hex HMAC-SHA256 of `body`.
#[must_use]
pub fn sign(body: &str, key: &SigningKey) -> String {
    let mut mac = mac_for(key);
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex signature against `body` in constant time.
///
/// # Errors
///
/// Returns `SignatureMismatch` if the signature is not valid hex or does
/// not match.
pub fn verify_signature(
    body: &str,
    signature: &str,
    key: &SigningKey,
) -> Result<(), VerificationError> {
    let expected =
        hex::decode(signature.trim()).map_err(|_| VerificationError::SignatureMismatch)?;
    let mut mac = mac_for(key);
    mac.update(body.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| VerificationError::SignatureMismatch)
}

fn mac_for(key: &SigningKey) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"))
}

/// Header fields and body of a verified document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLog {
    pub task_id: String,
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub body: String,
}

/// Outcome of verifying a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// Whether the signature matches the body.
    pub valid: bool,
    /// The parsed log, when the document could be parsed.
    pub log: Option<VerifiedLog>,
    /// Why verification failed.
    pub error: Option<VerificationError>,
}

impl VerificationReport {
    fn invalid(log: Option<VerifiedLog>, error: VerificationError) -> Self {
        Self {
            valid: false,
            log,
            error: Some(error),
        }
    }
}

/// Where a finalized log ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedLog {
    /// Location returned by the sink.
    pub path: PathBuf,
    /// The exact persisted document.
    pub document: String,
}

/// Builds and signs execution logs and hands them to a sink.
#[derive(Clone)]
pub struct AuditLogger {
    keys: Arc<SecretKeyManager>,
    sink: Arc<dyn LogSink>,
}

impl AuditLogger {
    /// Creates a logger.
    #[must_use]
    pub fn new(keys: Arc<SecretKeyManager>, sink: Arc<dyn LogSink>) -> Self {
        Self { keys, sink }
    }

    /// Starts a running log for a task.
    #[must_use]
    pub fn create_log(&self, task_id: &TaskId) -> ExecutionLog {
        let log = ExecutionLog::new(task_id.clone());
        tracing::debug!(
            task_id = %task_id,
            execution_id = %log.execution_id(),
            "created execution log"
        );
        log
    }

    /// Appends a step. No I/O.
    pub fn add_step(
        &self,
        log: &mut ExecutionLog,
        action: &str,
        output: Option<String>,
        error: Option<String>,
    ) {
        log.push_step(action, output, error);
    }

    /// Sets the terminal status, signs the rendered body and persists the
    /// document.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is already finalized, the signing key is
    /// unavailable, or the sink fails.
    pub async fn finalize(
        &self,
        log: &mut ExecutionLog,
        success: bool,
    ) -> Result<FinalizedLog, Report<AuditError>> {
        log.complete(success)?;

        let key = self.keys.load_or_create().map_err(AuditError::from)?;
        let body = render_body(log);
        log.set_signature(sign(&body, &key));

        let document = render_document(&LogHeader::for_log(log), &body)?;
        let path = self.sink.persist(log, &document).await?;

        tracing::info!(
            task_id = %log.task_id(),
            execution_id = %log.execution_id(),
            status = %log.status(),
            path = %path.display(),
            "execution log finalized"
        );
        Ok(FinalizedLog { path, document })
    }

    /// Verifies a persisted document against the installation key.
    #[must_use]
    pub fn verify(&self, document: &str) -> VerificationReport {
        let reason = match self.keys.load_existing() {
            Ok(Some(key)) => return verify_document(document, &key),
            Ok(None) => "no signing key has been created on this installation".to_string(),
            Err(e) => e.to_string(),
        };
        VerificationReport::invalid(None, VerificationError::KeyUnavailable { reason })
    }
}

/// Verifies a document with an explicit key.
#[must_use]
pub fn verify_document(document: &str, key: &SigningKey) -> VerificationReport {
    let (header, body) = match parse_document(document) {
        Ok(parsed) => parsed,
        Err(e) => return VerificationReport::invalid(None, e),
    };
    let log = VerifiedLog {
        task_id: header.task_id,
        execution_id: header.execution_id,
        timestamp: header.timestamp,
        status: header.status,
        body: body.to_string(),
    };

    let Some(signature) = header.signature else {
        return VerificationReport::invalid(Some(log), VerificationError::SignatureAbsent);
    };
    match verify_signature(body, &signature, key) {
        Ok(()) => VerificationReport {
            valid: true,
            log: Some(log),
            error: None,
        },
        Err(e) => VerificationReport::invalid(Some(log), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KEY_LEN, MemoryKeyStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        documents: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LogSink for MemorySink {
        async fn persist(&self, log: &ExecutionLog, document: &str) -> Result<PathBuf, AuditError> {
            self.documents
                .lock()
                .expect("lock")
                .push(document.to_string());
            Ok(PathBuf::from(format!("{}.md", log.execution_id())))
        }
    }

    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn persist(&self, _: &ExecutionLog, _: &str) -> Result<PathBuf, AuditError> {
            Err(AuditError::PersistFailed {
                reason: "disk full".to_string(),
            })
        }
    }

    fn key() -> SigningKey {
        SigningKey::from_bytes([42; KEY_LEN])
    }

    fn logger(sink: Arc<dyn LogSink>) -> AuditLogger {
        let keys = SecretKeyManager::new(MemoryKeyStore::with_key(&key()));
        AuditLogger::new(Arc::new(keys), sink)
    }

    fn task_id() -> TaskId {
        TaskId::new("nightly").expect("valid id")
    }

    #[test]
    fn sign_then_verify_round_trip() {
        let body = "# Execution Log: nightly\n\nsome steps\n";
        let signature = sign(body, &key());
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(body, &signature, &key()).is_ok());
    }

    #[test]
    fn any_single_byte_mutation_invalidates() {
        let body = "# Execution Log: nightly\n\n- status: success\n";
        let signature = sign(body, &key());
        for index in 0..body.len() {
            let mut bytes = body.as_bytes().to_vec();
            bytes[index] ^= 0x01;
            let mutated = String::from_utf8(bytes).expect("ascii stays utf-8");
            assert_eq!(
                verify_signature(&mutated, &signature, &key()),
                Err(VerificationError::SignatureMismatch),
                "mutation at byte {index} went undetected"
            );
        }
    }

    #[test]
    fn different_key_does_not_verify() {
        let signature = sign("body", &key());
        let other = SigningKey::from_bytes([1; KEY_LEN]);
        assert!(verify_signature("body", &signature, &other).is_err());
    }

    #[tokio::test]
    async fn finalize_signs_and_persists() {
        let sink = Arc::new(MemorySink::default());
        let logger = logger(sink.clone());

        let mut log = logger.create_log(&task_id());
        logger.add_step(&mut log, "cli_execution", Some("ok".to_string()), None);
        let finalized = logger.finalize(&mut log, true).await.expect("finalize");

        assert_eq!(log.status(), ExecutionStatus::Success);
        assert!(log.signature().is_some());
        assert_eq!(
            sink.documents.lock().expect("lock").as_slice(),
            [finalized.document.clone()]
        );

        let report = logger.verify(&finalized.document);
        assert!(report.valid, "{:?}", report.error);
        let verified = report.log.expect("log");
        assert_eq!(verified.task_id, "nightly");
        assert_eq!(verified.execution_id, log.execution_id().to_string());
        assert_eq!(verified.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn tampered_body_fails_verification() {
        let logger = logger(Arc::new(MemorySink::default()));
        let mut log = logger.create_log(&task_id());
        logger.add_step(&mut log, "api_execution", Some("result".to_string()), None);
        let finalized = logger.finalize(&mut log, true).await.expect("finalize");

        let tampered = finalized.document.replace("result", "resulT");
        let report = logger.verify(&tampered);
        assert!(!report.valid);
        assert_eq!(report.error, Some(VerificationError::SignatureMismatch));

        let whitespace = format!("{} ", finalized.document);
        assert!(!logger.verify(&whitespace).valid);
    }

    #[tokio::test]
    async fn header_edits_do_not_affect_signature() {
        let logger = logger(Arc::new(MemorySink::default()));
        let mut log = logger.create_log(&task_id());
        let finalized = logger.finalize(&mut log, false).await.expect("finalize");

        // The header is metadata alongside the signed body.
        let edited = finalized
            .document
            .replacen("category = ", "# note\ncategory = ", 1);
        assert!(logger.verify(&edited).valid);
    }

    #[test]
    fn missing_signature_is_reported_distinctly() {
        let logger = logger(Arc::new(MemorySink::default()));
        let mut log = ExecutionLog::new(task_id());
        log.complete(true).expect("complete");
        let document =
            render_document(&LogHeader::for_log(&log), &render_body(&log)).expect("render");

        let report = logger.verify(&document);
        assert!(!report.valid);
        assert_eq!(report.error, Some(VerificationError::SignatureAbsent));
        assert!(report.log.is_some());
    }

    #[test]
    fn garbage_is_malformed() {
        let report = logger(Arc::new(MemorySink::default())).verify("not a log");
        assert!(!report.valid);
        assert!(report.log.is_none());
        assert!(matches!(report.error, Some(VerificationError::Malformed { .. })));
    }

    #[tokio::test]
    async fn verify_without_a_key_leaves_the_installation_untouched() {
        let signer = logger(Arc::new(MemorySink::default()));
        let mut log = signer.create_log(&task_id());
        let finalized = signer.finalize(&mut log, true).await.expect("finalize");

        let dir = tempfile::tempdir().expect("tempdir");
        let key_path = dir.path().join("signing.key");
        let verifier = AuditLogger::new(
            Arc::new(SecretKeyManager::from_file(&key_path)),
            Arc::new(MemorySink::default()),
        );

        let report = verifier.verify(&finalized.document);
        assert!(!report.valid);
        assert!(matches!(
            report.error,
            Some(VerificationError::KeyUnavailable { .. })
        ));
        assert!(!key_path.exists());
    }

    #[tokio::test]
    async fn finalize_twice_is_rejected() {
        let logger = logger(Arc::new(MemorySink::default()));
        let mut log = logger.create_log(&task_id());
        logger.finalize(&mut log, true).await.expect("finalize");
        let err = logger.finalize(&mut log, false).await.unwrap_err();
        assert!(err.to_string().contains("already finalized"));
        assert_eq!(log.status(), ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn sink_failure_surfaces() {
        let logger = logger(Arc::new(FailingSink));
        let mut log = logger.create_log(&task_id());
        let err = logger.finalize(&mut log, true).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }
}
