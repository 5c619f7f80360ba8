//! Log document rendering and parsing.
//!
//! A persisted log is a `+++`-delimited TOML header followed by a Markdown
//! body. The signature in the header covers the body bytes exactly as
//! written; the header itself is not signed.

use crate::error::{AuditError, VerificationError};
use crate::log::{ExecutionLog, ExecutionStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use taskward_core::frontmatter;

/// Category tag identifying execution log documents.
pub const LOG_CATEGORY: &str = "execution-log";

/// Metadata header of a log document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    /// Always [`LOG_CATEGORY`].
    pub category: String,
    /// Task id.
    pub task_id: String,
    /// Execution id.
    pub execution_id: String,
    /// Execution start, ISO-8601 UTC.
    pub timestamp: DateTime<Utc>,
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Hex HMAC-SHA256 of the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl LogHeader {
    /// Builds the header for a log.
    #[must_use]
    pub fn for_log(log: &ExecutionLog) -> Self {
        Self {
            category: LOG_CATEGORY.to_string(),
            task_id: log.task_id().to_string(),
            execution_id: log.execution_id().to_string(),
            timestamp: log.timestamp(),
            status: log.status(),
            signature: log.signature().map(str::to_string),
        }
    }
}

fn iso(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn fenced(out: &mut String, label: &str, text: &str) {
    let _ = writeln!(out, "**{label}:**\n");
    let _ = writeln!(out, "```");
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "```\n");
}

/// Renders the human-readable body that gets signed.
#[must_use]
pub fn render_body(log: &ExecutionLog) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Execution Log: {}\n", log.task_id());
    let _ = writeln!(out, "- **Execution ID:** {}", log.execution_id());
    let _ = writeln!(out, "- **Status:** {}", log.status());
    let _ = writeln!(out, "- **Timestamp:** {}\n", iso(log.timestamp()));
    let _ = writeln!(out, "## Steps\n");

    if log.steps().is_empty() {
        let _ = writeln!(out, "_No steps recorded._");
    }
    for (index, step) in log.steps().iter().enumerate() {
        let _ = writeln!(out, "### {}. {}\n", index + 1, step.action);
        let _ = writeln!(out, "_{}_\n", iso(step.timestamp));
        if let Some(output) = &step.output {
            fenced(&mut out, "Output", output);
        }
        if let Some(error) = &step.error {
            fenced(&mut out, "Error", error);
        }
    }
    out
}

/// Joins a header and a body into a document.
///
/// # Errors
///
/// Returns `AuditError::RenderFailed` if the header cannot be serialized.
pub fn render_document(header: &LogHeader, body: &str) -> Result<String, AuditError> {
    let header = toml::to_string(header).map_err(|e| AuditError::RenderFailed {
        reason: e.to_string(),
    })?;
    Ok(frontmatter::join(&header, body))
}

/// Splits a document into its header and verbatim body.
///
/// # Errors
///
/// Returns `VerificationError::Malformed` if the framing or header is
/// invalid or the category is wrong.
pub fn parse_document(document: &str) -> Result<(LogHeader, &str), VerificationError> {
    let (header, body) = frontmatter::split(document).map_err(|e| VerificationError::Malformed {
        reason: e.to_string(),
    })?;
    let header: LogHeader = toml::from_str(header).map_err(|e| VerificationError::Malformed {
        reason: e.message().to_string(),
    })?;
    if header.category != LOG_CATEGORY {
        return Err(VerificationError::Malformed {
            reason: format!("unexpected category '{}'", header.category),
        });
    }
    Ok((header, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskward_core::TaskId;

    fn finished_log() -> ExecutionLog {
        let mut log = ExecutionLog::new(TaskId::new("nightly").expect("valid id"));
        log.push_step("cli_execution", Some("all good".to_string()), None);
        log.push_step("timeout", None, Some("exceeded 300s".to_string()));
        log.complete(false).expect("complete");
        log
    }

    #[test]
    fn body_contains_trace_in_order() {
        let log = finished_log();
        let body = render_body(&log);

        assert!(body.starts_with("# Execution Log: nightly\n"));
        assert!(body.contains(&format!("- **Execution ID:** {}", log.execution_id())));
        assert!(body.contains("- **Status:** failure"));
        let first = body.find("### 1. cli_execution").expect("first step");
        let second = body.find("### 2. timeout").expect("second step");
        assert!(first < second);
        assert!(body.contains("**Output:**\n\n```\nall good\n```"));
        assert!(body.contains("**Error:**\n\n```\nexceeded 300s\n```"));
    }

    #[test]
    fn empty_trace_is_marked() {
        let log = ExecutionLog::new(TaskId::new("nightly").expect("valid id"));
        assert!(render_body(&log).contains("_No steps recorded._"));
    }

    #[test]
    fn document_round_trips_header_and_body() {
        let log = finished_log();
        let body = render_body(&log);
        let mut header = LogHeader::for_log(&log);
        header.signature = Some("ab12".to_string());

        let document = render_document(&header, &body).expect("render");
        assert!(document.starts_with("+++\ncategory = \"execution-log\"\n"));

        let (parsed, parsed_body) = parse_document(&document).expect("parse");
        assert_eq!(parsed, header);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn unsigned_header_omits_signature() {
        let log = finished_log();
        let document = render_document(&LogHeader::for_log(&log), "body\n").expect("render");
        assert!(!document.contains("signature"));
        let (parsed, _) = parse_document(&document).expect("parse");
        assert_eq!(parsed.signature, None);
    }

    #[test]
    fn wrong_category_is_malformed() {
        let document = "+++\ncategory = \"task\"\ntask_id = \"a\"\nexecution_id = \"b\"\n\
                        timestamp = \"2026-01-01T00:00:00Z\"\nstatus = \"success\"\n+++\nbody\n";
        let err = parse_document(document).unwrap_err();
        assert!(matches!(err, VerificationError::Malformed { .. }));
    }

    #[test]
    fn missing_frontmatter_is_malformed() {
        assert!(matches!(
            parse_document("just text"),
            Err(VerificationError::Malformed { .. })
        ));
    }
}
