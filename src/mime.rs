//! Typed MIME part tree and attachment discovery.
//!
//! A mailbox message body is a recursive tree of parts (multipart containers
//! nest to arbitrary depth). [`collect_attachments`] walks the tree and
//! returns the parts worth classifying: declared PDFs, or parts whose
//! filename carries the `.pdf` suffix, that also expose a fetchable
//! attachment reference. Parts without a reference are inline content and
//! are skipped.

use crate::models::CandidateAttachment;

pub const PDF_MIME: &str = "application/pdf";
pub const PDF_SUFFIX: &str = ".pdf";

/// Longest filename retained in sanitized output.
const MAX_FILENAME_CHARS: usize = 120;

/// One node of a message's MIME part tree.
#[derive(Debug, Clone, Default)]
pub struct MimePart {
    pub mime_type: String,
    pub filename: String,
    /// Reference for fetching the part's bytes. `None` means the part is
    /// inline content, not an attachment.
    pub attachment_id: Option<String>,
    pub size: i64,
    pub parts: Vec<MimePart>,
}

/// Walk the part tree and collect every candidate document attachment.
///
/// Returns an empty vec when nothing qualifies; this is the common case.
pub fn collect_attachments(root: &MimePart) -> Vec<CandidateAttachment> {
    let mut found = Vec::new();
    walk(root, &mut found);
    found
}

fn walk(part: &MimePart, found: &mut Vec<CandidateAttachment>) {
    if let Some(attachment_id) = &part.attachment_id {
        if is_pdf_candidate(part) {
            found.push(CandidateAttachment {
                filename: if part.filename.is_empty() {
                    "document.pdf".to_string()
                } else {
                    part.filename.clone()
                },
                size: part.size,
                attachment_id: attachment_id.clone(),
            });
        }
    }
    for child in &part.parts {
        walk(child, found);
    }
}

fn is_pdf_candidate(part: &MimePart) -> bool {
    part.mime_type.eq_ignore_ascii_case(PDF_MIME)
        || part.filename.to_ascii_lowercase().ends_with(PDF_SUFFIX)
}

/// Strip path-unsafe characters from an attachment filename and bound its
/// length, for disposition headers and stored metadata.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        return "document.pdf".to_string();
    }

    trimmed.chars().take(MAX_FILENAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_part(filename: &str, attachment_id: Option<&str>) -> MimePart {
        MimePart {
            mime_type: PDF_MIME.to_string(),
            filename: filename.to_string(),
            attachment_id: attachment_id.map(|s| s.to_string()),
            size: 1024,
            parts: Vec::new(),
        }
    }

    #[test]
    fn finds_nested_attachment() {
        let root = MimePart {
            mime_type: "multipart/mixed".to_string(),
            parts: vec![MimePart {
                mime_type: "multipart/alternative".to_string(),
                parts: vec![
                    MimePart {
                        mime_type: "text/plain".to_string(),
                        ..Default::default()
                    },
                    pdf_part("warranty.pdf", Some("att-1")),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        let found = collect_attachments(&root);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attachment_id, "att-1");
        assert_eq!(found[0].filename, "warranty.pdf");
    }

    #[test]
    fn inline_pdf_without_reference_skipped() {
        let root = pdf_part("inline.pdf", None);
        assert!(collect_attachments(&root).is_empty());
    }

    #[test]
    fn suffix_match_without_declared_type() {
        let mut part = pdf_part("Receipt.PDF", Some("att-2"));
        part.mime_type = "application/octet-stream".to_string();
        let found = collect_attachments(&part);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn non_document_parts_ignored() {
        let root = MimePart {
            mime_type: "multipart/mixed".to_string(),
            parts: vec![MimePart {
                mime_type: "image/png".to_string(),
                filename: "photo.png".to_string(),
                attachment_id: Some("att-3".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(collect_attachments(&root).is_empty());
    }

    #[test]
    fn missing_filename_defaults() {
        let found = collect_attachments(&pdf_part("", Some("att-4")));
        assert_eq!(found[0].filename, "document.pdf");
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(
            sanitize_filename("../../etc/passwd\\evil.pdf"),
            "_.._etc_passwd_evil.pdf"
        );
    }

    #[test]
    fn sanitize_bounds_length() {
        let long = format!("{}.pdf", "a".repeat(300));
        assert_eq!(sanitize_filename(&long).chars().count(), 120);
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename("   "), "document.pdf");
        assert_eq!(sanitize_filename("..."), "document.pdf");
    }
}
