//! Core data types that flow through the scan pipeline.
//!
//! Candidates (messages, attachments) are ephemeral and never persisted;
//! only accepted warranty documents reach storage. Reports carry
//! [`DocumentSummary`] projections, never raw bytes.

use chrono::NaiveDate;
use serde::Serialize;

/// Lower clamp bound for a scan's message quota.
pub const MIN_SCAN_RESULTS: u32 = 1;
/// Upper clamp bound for a scan's message quota.
pub const MAX_SCAN_RESULTS: u32 = 50;

/// Parameters for one end-to-end scan of an owner's mailbox.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub owner_id: String,
    pub max_results: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ScanRequest {
    /// Clamp the quota into `[MIN_SCAN_RESULTS, MAX_SCAN_RESULTS]`.
    pub fn normalized(mut self) -> Self {
        self.max_results = self.max_results.clamp(MIN_SCAN_RESULTS, MAX_SCAN_RESULTS);
        self
    }

    /// Reject invalid requests before any network activity.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.owner_id.trim().is_empty() {
            anyhow::bail!("owner id must not be empty");
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                anyhow::bail!(
                    "start date {} is after end date {}",
                    start.format("%Y-%m-%d"),
                    end.format("%Y-%m-%d")
                );
            }
        }
        Ok(())
    }
}

/// A message identified by the mailbox search, before classification.
#[derive(Debug, Clone)]
pub struct CandidateMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// Message timestamp (Unix epoch seconds), when the mailbox reports one.
    pub date: Option<i64>,
}

/// A document attachment discovered in a message's MIME tree.
#[derive(Debug, Clone)]
pub struct CandidateAttachment {
    pub filename: String,
    pub size: i64,
    pub attachment_id: String,
}

/// Accept/reject outcome for one attachment's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationVerdict {
    pub is_warranty: bool,
    /// 0–100; product-tuned constants, see `classify`.
    pub confidence: u8,
    pub heuristic_score: i32,
    pub remote_label: Option<String>,
    pub reason: String,
}

impl ClassificationVerdict {
    /// A rejecting verdict produced without consulting the remote classifier
    /// (unreadable input, empty text).
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_warranty: false,
            confidence: 0,
            heuristic_score: 0,
            remote_label: None,
            reason: reason.into(),
        }
    }
}

/// Best-effort metadata pulled from the document text on accept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldGuesses {
    pub product_name: Option<String>,
    pub purchase_date: Option<String>,
    pub expiration_date: Option<String>,
}

/// The full classification result for one attachment's bytes: the verdict
/// plus the field guesses derived from the same extracted text. Cached by
/// content hash so identical bytes are never re-extracted or re-classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub content_hash: String,
    pub verdict: ClassificationVerdict,
    pub guesses: FieldGuesses,
}

/// Projection of a stored document embedded in reports and list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub subject: String,
    pub sender: String,
    pub message_date: Option<i64>,
    pub product_name_guess: Option<String>,
    pub purchase_date_guess: Option<String>,
    pub expiration_date_guess: Option<String>,
    pub confidence: u8,
    pub byte_size: i64,
}

/// Final result of one scan, returned to the caller. Not persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub total_accepted: usize,
    pub documents: Vec<DocumentSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(max_results: u32) -> ScanRequest {
        ScanRequest {
            owner_id: "owner-1".to_string(),
            max_results,
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn quota_clamped_to_maximum() {
        assert_eq!(request(500).normalized().max_results, MAX_SCAN_RESULTS);
    }

    #[test]
    fn quota_clamped_to_minimum() {
        assert_eq!(request(0).normalized().max_results, MIN_SCAN_RESULTS);
    }

    #[test]
    fn quota_in_range_untouched() {
        assert_eq!(request(17).normalized().max_results, 17);
    }

    #[test]
    fn inverted_date_range_rejected() {
        let mut req = request(10);
        req.start_date = NaiveDate::from_ymd_opt(2024, 2, 1);
        req.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(req.validate().is_err());
    }

    #[test]
    fn equal_dates_accepted() {
        let mut req = request(10);
        req.start_date = NaiveDate::from_ymd_opt(2024, 1, 15);
        req.end_date = NaiveDate::from_ymd_opt(2024, 1, 15);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn empty_owner_rejected() {
        let mut req = request(10);
        req.owner_id = "  ".to_string();
        assert!(req.validate().is_err());
    }
}
