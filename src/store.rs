//! Idempotent persistence of accepted warranty documents.
//!
//! Two natural identities guard against duplicates: the message/attachment
//! pair a document arrived through, and the content hash of its bytes. A
//! rescan of the same message refreshes the existing row; the same bytes
//! arriving through a different message refresh the original row instead of
//! storing a second copy.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::mime;
use crate::models::{CandidateAttachment, CandidateMessage, Classification, DocumentSummary};

/// What an upsert did. `Skipped` rows never touched the database.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Stored(DocumentSummary),
    Refreshed(DocumentSummary),
    Skipped,
}

impl UpsertOutcome {
    pub fn summary(&self) -> Option<&DocumentSummary> {
        match self {
            UpsertOutcome::Stored(s) | UpsertOutcome::Refreshed(s) => Some(s),
            UpsertOutcome::Skipped => None,
        }
    }
}

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert-or-refresh an accepted document. No-op for rejecting verdicts.
    pub async fn upsert(
        &self,
        owner_id: &str,
        message: &CandidateMessage,
        attachment: &CandidateAttachment,
        classification: &Classification,
        bytes: &[u8],
    ) -> Result<UpsertOutcome> {
        if !classification.verdict.is_warranty {
            return Ok(UpsertOutcome::Skipped);
        }

        let now = chrono::Utc::now().timestamp();
        let filename = mime::sanitize_filename(&attachment.filename);

        // Same bytes already stored through a different message/attachment
        // identity: refresh that row, do not store the bytes twice.
        let by_content: Option<(String, String, String)> = sqlx::query_as(
            "SELECT id, source_message_id, source_attachment_id
             FROM warranty_documents WHERE owner_id = ? AND content_hash = ?",
        )
        .bind(owner_id)
        .bind(&classification.content_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id, msg_id, att_id)) = by_content {
            if msg_id != message.id || att_id != attachment.attachment_id {
                sqlx::query("UPDATE warranty_documents SET updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(&id)
                    .execute(&self.pool)
                    .await?;
                let summary = self
                    .summary_by_id(&id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("document {} vanished during upsert", id))?;
                return Ok(UpsertOutcome::Refreshed(summary));
            }
        }

        let existing_id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM warranty_documents
             WHERE owner_id = ? AND source_message_id = ? AND source_attachment_id = ?",
        )
        .bind(owner_id)
        .bind(&message.id)
        .bind(&attachment.attachment_id)
        .fetch_optional(&self.pool)
        .await?;

        let refreshed = existing_id.is_some();
        let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO warranty_documents (
                id, owner_id, source_message_id, source_attachment_id, content_hash,
                filename, byte_size, subject, sender, message_date,
                product_name_guess, purchase_date_guess, expiration_date_guess,
                confidence, raw_bytes, content_type, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, source_message_id, source_attachment_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                filename = excluded.filename,
                byte_size = excluded.byte_size,
                subject = excluded.subject,
                sender = excluded.sender,
                message_date = excluded.message_date,
                product_name_guess = COALESCE(excluded.product_name_guess, warranty_documents.product_name_guess),
                purchase_date_guess = COALESCE(excluded.purchase_date_guess, warranty_documents.purchase_date_guess),
                expiration_date_guess = COALESCE(excluded.expiration_date_guess, warranty_documents.expiration_date_guess),
                confidence = excluded.confidence,
                raw_bytes = excluded.raw_bytes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc_id)
        .bind(owner_id)
        .bind(&message.id)
        .bind(&attachment.attachment_id)
        .bind(&classification.content_hash)
        .bind(&filename)
        .bind(bytes.len() as i64)
        .bind(&message.subject)
        .bind(&message.sender)
        .bind(message.date)
        .bind(&classification.guesses.product_name)
        .bind(&classification.guesses.purchase_date)
        .bind(&classification.guesses.expiration_date)
        .bind(i64::from(classification.verdict.confidence))
        .bind(bytes)
        .bind(mime::PDF_MIME)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let summary = DocumentSummary {
            id: doc_id,
            filename,
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            message_date: message.date,
            product_name_guess: classification.guesses.product_name.clone(),
            purchase_date_guess: classification.guesses.purchase_date.clone(),
            expiration_date_guess: classification.guesses.expiration_date.clone(),
            confidence: classification.verdict.confidence,
            byte_size: bytes.len() as i64,
        };

        Ok(if refreshed {
            UpsertOutcome::Refreshed(summary)
        } else {
            UpsertOutcome::Stored(summary)
        })
    }

    pub async fn list(&self, owner_id: &str, limit: i64) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            "SELECT id, filename, subject, sender, message_date, product_name_guess,
                    purchase_date_guess, expiration_date_guess, confidence, byte_size
             FROM warranty_documents
             WHERE owner_id = ?
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_summary).collect())
    }

    pub async fn count(&self, owner_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM warranty_documents WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Raw bytes for the attachment download endpoint, addressed the way the
    /// client saw them: by source message and attachment id.
    pub async fn fetch_raw(
        &self,
        owner_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Option<(String, String, Vec<u8>)>> {
        let row = sqlx::query(
            "SELECT filename, content_type, raw_bytes FROM warranty_documents
             WHERE owner_id = ? AND source_message_id = ? AND source_attachment_id = ?",
        )
        .bind(owner_id)
        .bind(message_id)
        .bind(attachment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            (
                r.get::<String, _>("filename"),
                r.get::<String, _>("content_type"),
                r.get::<Vec<u8>, _>("raw_bytes"),
            )
        }))
    }

    async fn summary_by_id(&self, id: &str) -> Result<Option<DocumentSummary>> {
        let row = sqlx::query(
            "SELECT id, filename, subject, sender, message_date, product_name_guess,
                    purchase_date_guess, expiration_date_guess, confidence, byte_size
             FROM warranty_documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_summary))
    }
}

fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> DocumentSummary {
    DocumentSummary {
        id: row.get("id"),
        filename: row.get("filename"),
        subject: row.get("subject"),
        sender: row.get("sender"),
        message_date: row.get("message_date"),
        product_name_guess: row.get("product_name_guess"),
        purchase_date_guess: row.get("purchase_date_guess"),
        expiration_date_guess: row.get("expiration_date_guess"),
        confidence: row.get::<i64, _>("confidence") as u8,
        byte_size: row.get("byte_size"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::content_hash;
    use crate::db;
    use crate::models::{ClassificationVerdict, FieldGuesses};

    async fn test_store() -> (tempfile::TempDir, DocumentStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("wdx.sqlite")).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        (tmp, DocumentStore::new(pool))
    }

    fn message(id: &str) -> CandidateMessage {
        CandidateMessage {
            id: id.to_string(),
            subject: "Your warranty".to_string(),
            sender: "store@example.com".to_string(),
            date: Some(1_706_000_000),
        }
    }

    fn attachment(id: &str) -> CandidateAttachment {
        CandidateAttachment {
            filename: "warranty.pdf".to_string(),
            size: 4,
            attachment_id: id.to_string(),
        }
    }

    fn accepted(bytes: &[u8]) -> Classification {
        Classification {
            content_hash: content_hash(bytes),
            verdict: ClassificationVerdict {
                is_warranty: true,
                confidence: 95,
                heuristic_score: 4,
                remote_label: Some("warranty".to_string()),
                reason: "agree".to_string(),
            },
            guesses: FieldGuesses::default(),
        }
    }

    fn rejected(bytes: &[u8]) -> Classification {
        Classification {
            content_hash: content_hash(bytes),
            verdict: ClassificationVerdict::rejected("not a warranty"),
            guesses: FieldGuesses::default(),
        }
    }

    #[tokio::test]
    async fn rejecting_verdict_is_skipped() {
        let (_tmp, store) = test_store().await;
        let outcome = store
            .upsert("o1", &message("m1"), &attachment("a1"), &rejected(b"doc"), b"doc")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped);
        assert_eq!(store.count("o1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rescan_of_same_identity_refreshes_one_row() {
        let (_tmp, store) = test_store().await;
        let bytes = b"warranty document bytes";

        let first = store
            .upsert("o1", &message("m1"), &attachment("a1"), &accepted(bytes), bytes)
            .await
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Stored(_)));

        let second = store
            .upsert("o1", &message("m1"), &attachment("a1"), &accepted(bytes), bytes)
            .await
            .unwrap();
        assert!(matches!(second, UpsertOutcome::Refreshed(_)));

        assert_eq!(store.count("o1").await.unwrap(), 1);
        assert_eq!(
            first.summary().unwrap().id,
            second.summary().unwrap().id
        );
    }

    #[tokio::test]
    async fn same_bytes_through_different_message_deduplicated() {
        let (_tmp, store) = test_store().await;
        let bytes = b"identical physical document";

        store
            .upsert("o1", &message("m1"), &attachment("a1"), &accepted(bytes), bytes)
            .await
            .unwrap();
        let outcome = store
            .upsert("o1", &message("m2"), &attachment("a2"), &accepted(bytes), bytes)
            .await
            .unwrap();

        assert!(matches!(outcome, UpsertOutcome::Refreshed(_)));
        assert_eq!(store.count("o1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_bytes_for_different_owners_stored_separately() {
        let (_tmp, store) = test_store().await;
        let bytes = b"shared manual";

        store
            .upsert("o1", &message("m1"), &attachment("a1"), &accepted(bytes), bytes)
            .await
            .unwrap();
        store
            .upsert("o2", &message("m1"), &attachment("a1"), &accepted(bytes), bytes)
            .await
            .unwrap();

        assert_eq!(store.count("o1").await.unwrap(), 1);
        assert_eq!(store.count("o2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_returns_projection_without_bytes() {
        let (_tmp, store) = test_store().await;
        let bytes = b"doc";
        store
            .upsert("o1", &message("m1"), &attachment("a1"), &accepted(bytes), bytes)
            .await
            .unwrap();

        let docs = store.list("o1", 10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].filename, "warranty.pdf");
        assert_eq!(docs[0].confidence, 95);
        assert_eq!(docs[0].byte_size, 3);
    }

    #[tokio::test]
    async fn fetch_raw_round_trips_stored_bytes() {
        let (_tmp, store) = test_store().await;
        let bytes = b"raw pdf bytes";
        store
            .upsert("o1", &message("m1"), &attachment("a1"), &accepted(bytes), bytes)
            .await
            .unwrap();

        let (filename, content_type, raw) = store
            .fetch_raw("o1", "m1", "a1")
            .await
            .unwrap()
            .expect("stored document present");
        assert_eq!(filename, "warranty.pdf");
        assert_eq!(content_type, "application/pdf");
        assert_eq!(raw, bytes);

        assert!(store.fetch_raw("o1", "m1", "missing").await.unwrap().is_none());
    }
}
