//! Persistent catalog: distinct PDFs, user↔PDF links, users, sessions.
//!
//! A thin SQLite layer (sqlx) keyed by content hash. The `pdfs.content_hash`
//! UNIQUE constraint is the deduplication backstop: two racing ingestions of
//! the same new PDF may both do the work, but only one row can ever exist —
//! [`Catalog::insert_pdf`] treats a uniqueness violation as "fetch the
//! existing record", never as an error.
//!
//! ## Write serialisation and replication
//!
//! All writes funnel through one process-wide async mutex. Write volume is
//! one insert per ingestion, so a single logical writer costs nothing and
//! keeps concurrent HTTP handlers from interleaving multi-statement writes.
//! After every write the whole database file is re-uploaded to the remote
//! tier — coarse (O(db size) per write) but trivially correct, and the
//! accepted trade-off at this catalog's scale. The upload returns a result
//! the call sites deliberately ignore.
//!
//! At startup, a missing local database is restored from the remote replica
//! when one exists, so a redeployed node resumes with its history intact.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::LecternError;
use crate::store::RemoteTier;

/// Remote key under which the catalog file is replicated.
const REPLICA_KEY: &str = "catalog/lectern.db";

/// One distinct PDF, keyed by content hash. Created once on first successful
/// ingestion; never mutated, never deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PdfRecord {
    pub pdf_id: i64,
    pub title: String,
    pub storage_key: String,
    pub content_hash: String,
    pub byte_size: i64,
    pub page_count: i64,
    pub created_at: i64,
}

/// A registered account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// The user a valid session token resolves to.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
}

/// SQLite-backed catalog with serialized writes and remote replication.
pub struct Catalog {
    pool: SqlitePool,
    db_path: PathBuf,
    write_lock: Mutex<()>,
    remote: Option<Arc<dyn RemoteTier>>,
}

impl Catalog {
    /// Open (or create) the catalog at `db_path`.
    ///
    /// If the file is absent and the remote tier holds a replica, the replica
    /// is downloaded first so the node resumes with existing records.
    pub async fn open(
        db_path: impl AsRef<Path>,
        remote: Option<Arc<dyn RemoteTier>>,
    ) -> Result<Self, LecternError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !db_path.exists() {
            if let Some(remote) = &remote {
                if let Some(bytes) = remote.read(REPLICA_KEY).await {
                    info!(path = %db_path.display(), "restoring catalog from remote replica");
                    std::fs::write(&db_path, bytes)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(LecternError::Catalog)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let catalog = Self {
            pool,
            db_path,
            write_lock: Mutex::new(()),
            remote,
        };
        catalog.init_schema().await?;
        Ok(catalog)
    }

    async fn init_schema(&self) -> Result<(), LecternError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pdfs (
                pdf_id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                byte_size INTEGER NOT NULL,
                page_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_pdfs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                pdf_id INTEGER NOT NULL REFERENCES pdfs(pdf_id),
                linked_at INTEGER NOT NULL,
                UNIQUE(user_id, pdf_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                token TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pdfs_storage_key ON pdfs(storage_key)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ── PDF records ───────────────────────────────────────────────────────

    pub async fn lookup_by_hash(&self, content_hash: &str) -> Result<Option<PdfRecord>, LecternError> {
        let record = sqlx::query_as::<_, PdfRecord>("SELECT * FROM pdfs WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn lookup_by_key(&self, storage_key: &str) -> Result<Option<PdfRecord>, LecternError> {
        let record = sqlx::query_as::<_, PdfRecord>("SELECT * FROM pdfs WHERE storage_key = ?")
            .bind(storage_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Insert a new PDF record, idempotently.
    ///
    /// If `content_hash` is already present — including when a concurrent
    /// ingestion won the race between our lookup and our insert — the
    /// existing record is returned instead.
    pub async fn insert_pdf(
        &self,
        title: &str,
        storage_key: &str,
        content_hash: &str,
        byte_size: i64,
        page_count: i64,
    ) -> Result<PdfRecord, LecternError> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.lookup_by_hash(content_hash).await? {
            return Ok(existing);
        }

        let inserted = sqlx::query(
            "INSERT INTO pdfs (title, storage_key, content_hash, byte_size, page_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(title)
        .bind(storage_key)
        .bind(content_hash)
        .bind(byte_size)
        .bind(page_count)
        .bind(now_unix())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                // Lost the race to a concurrent ingestion; their row wins.
                warn!(content_hash, "duplicate insert raced; using existing record");
            }
            Err(e) => return Err(e.into()),
        }

        let record = self
            .lookup_by_hash(content_hash)
            .await?
            .ok_or_else(|| LecternError::Internal("pdf row vanished after insert".into()))?;

        let _ = self.replicate().await;
        Ok(record)
    }

    /// Associate a user with a PDF. Re-linking the same pair is a no-op.
    pub async fn link_user(&self, user_id: i64, pdf_id: i64) -> Result<(), LecternError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT OR IGNORE INTO user_pdfs (user_id, pdf_id, linked_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(pdf_id)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        let _ = self.replicate().await;
        Ok(())
    }

    /// Every PDF linked to a user, most recently linked first.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<PdfRecord>, LecternError> {
        let records = sqlx::query_as::<_, PdfRecord>(
            "SELECT p.* FROM pdfs p
             JOIN user_pdfs up ON p.pdf_id = up.pdf_id
             WHERE up.user_id = ?
             ORDER BY up.linked_at DESC, up.id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// All storage keys sharing a cleaned base name: the exact name plus any
    /// `base_…` suffixed versions (distinct-content uploads of the same
    /// display name).
    pub async fn lookup_versions_by_base_name(
        &self,
        base: &str,
    ) -> Result<Vec<String>, LecternError> {
        let rows = sqlx::query(
            "SELECT storage_key FROM pdfs
             WHERE storage_key = ?1 OR storage_key LIKE ?1 || '\\_%' ESCAPE '\\'
             ORDER BY created_at",
        )
        .bind(base)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("storage_key"))
            .collect())
    }

    // ── Users ─────────────────────────────────────────────────────────────

    /// Register a user; `None` when the username or email is already taken.
    pub async fn add_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<i64>, LecternError> {
        let _guard = self.write_lock.lock().await;
        let inserted = sqlx::query(
            "INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now_unix())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) => {
                let _ = self.replicate().await;
                Ok(Some(result.last_insert_rowid()))
            }
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<User>, LecternError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, username, email, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    // ── Sessions ──────────────────────────────────────────────────────────

    pub async fn create_session(
        &self,
        user_id: i64,
        token: &str,
        expires_at: i64,
    ) -> Result<(), LecternError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(token)
        .bind(now_unix())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        let _ = self.replicate().await;
        Ok(())
    }

    /// Delete a session token; `false` when it did not exist.
    pub async fn delete_session(&self, token: &str) -> Result<bool, LecternError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        let _ = self.replicate().await;
        Ok(result.rows_affected() > 0)
    }

    /// Resolve a session token to its user, enforcing expiry.
    ///
    /// A miss also purges every expired session row — cleanup rides along on
    /// failed validations rather than needing a background job.
    pub async fn session_user(&self, token: &str) -> Result<Option<SessionUser>, LecternError> {
        let now = now_unix();
        let row = sqlx::query(
            "SELECT s.user_id, u.username FROM sessions s
             JOIN users u ON s.user_id = u.user_id
             WHERE s.token = ? AND s.expires_at > ?",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(SessionUser {
                user_id: row.get("user_id"),
                username: row.get("username"),
            })),
            None => {
                let _guard = self.write_lock.lock().await;
                let purged = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                if purged.rows_affected() > 0 {
                    let _ = self.replicate().await;
                }
                Ok(None)
            }
        }
    }

    // ── Replication ───────────────────────────────────────────────────────

    /// Best-effort upload of the whole catalog file to the remote tier.
    ///
    /// Call sites ignore the result on purpose: replication failing must
    /// never fail the write it follows, but modelling it as a fallible call
    /// keeps the failure mode visible here rather than buried.
    pub async fn replicate(&self) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };

        // Fold the WAL into the main file so the replica is self-contained.
        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "wal checkpoint before replication failed");
        }

        match std::fs::read(&self.db_path) {
            Ok(bytes) => {
                remote
                    .write(REPLICA_KEY, &bytes, "application/vnd.sqlite3")
                    .await
            }
            Err(e) => {
                warn!(error = %e, "could not read catalog file for replication");
                false
            }
        }
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
