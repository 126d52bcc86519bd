use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS warranty_documents (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            source_message_id TEXT NOT NULL,
            source_attachment_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            filename TEXT NOT NULL,
            byte_size INTEGER NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            sender TEXT NOT NULL DEFAULT '',
            message_date INTEGER,
            product_name_guess TEXT,
            purchase_date_guess TEXT,
            expiration_date_guess TEXT,
            confidence INTEGER NOT NULL DEFAULT 0,
            raw_bytes BLOB NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'application/pdf',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(owner_id, source_message_id, source_attachment_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Same physical document reached through two different messages must not
    // be stored twice for one owner.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_warranty_documents_content
         ON warranty_documents(owner_id, content_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_warranty_documents_owner_updated
         ON warranty_documents(owner_id, updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
