//! `+++`-delimited document framing.
//!
//! Task definitions and execution logs are plain-text documents with a
//! TOML header between two `+++` lines followed by a free-text body. The
//! body is returned byte-for-byte so signatures over it stay reproducible.

use crate::error::FrontmatterError;

/// Header delimiter line.
pub const DELIMITER: &str = "+++";

/// Splits a document into its header and body.
///
/// # Errors
///
/// Returns an error if the opening or closing delimiter is missing.
pub fn split(document: &str) -> Result<(&str, &str), FrontmatterError> {
    let rest = document
        .strip_prefix("+++\n")
        .or_else(|| document.strip_prefix("+++\r\n"))
        .ok_or(FrontmatterError::MissingOpening)?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            return Ok((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    Err(FrontmatterError::MissingClosing)
}

/// Joins a header and a body into a document.
#[must_use]
pub fn join(header: &str, body: &str) -> String {
    let mut document = String::with_capacity(header.len() + body.len() + 10);
    document.push_str(DELIMITER);
    document.push('\n');
    document.push_str(header);
    if !header.is_empty() && !header.ends_with('\n') {
        document.push('\n');
    }
    document.push_str(DELIMITER);
    document.push('\n');
    document.push_str(body);
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_returns_header_and_exact_body() {
        let doc = "+++\nid = \"a\"\n+++\n# Title\n\n  trailing spaces  \n";
        let (header, body) = split(doc).expect("split");
        assert_eq!(header, "id = \"a\"\n");
        assert_eq!(body, "# Title\n\n  trailing spaces  \n");
    }

    #[test]
    fn split_stops_at_first_closing_delimiter() {
        let doc = "+++\na = 1\n+++\nbody\n+++\nmore\n";
        let (header, body) = split(doc).expect("split");
        assert_eq!(header, "a = 1\n");
        assert_eq!(body, "body\n+++\nmore\n");
    }

    #[test]
    fn split_accepts_crlf_delimiters() {
        let doc = "+++\r\na = 1\r\n+++\r\nbody";
        let (header, body) = split(doc).expect("split");
        assert_eq!(header, "a = 1\r\n");
        assert_eq!(body, "body");
    }

    #[test]
    fn split_rejects_missing_delimiters() {
        assert_eq!(split("no header"), Err(FrontmatterError::MissingOpening));
        assert_eq!(
            split("+++\na = 1\nbody"),
            Err(FrontmatterError::MissingClosing)
        );
    }

    #[test]
    fn join_then_split_preserves_body() {
        let doc = join("a = 1", "line one\nline two");
        assert_eq!(doc, "+++\na = 1\n+++\nline one\nline two");
        let (_, body) = split(&doc).expect("split");
        assert_eq!(body, "line one\nline two");
    }
}
