use anyhow::{Context, Result};
use sqlx::{
    migrate::{MigrateError, Migrator},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, warn};

use shared::domain::{AccountId, SavedQuote};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// What to do when the database was written by a different schema revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationPolicy {
    /// Apply pending migrations, refuse to open on unknown or altered ones.
    #[default]
    Additive,
    /// Drop every table and start from an empty schema.
    ResetOnMismatch,
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredAccount {
    pub account_id: AccountId,
    pub email: String,
    pub password_hash: String,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::open(database_url, MigrationPolicy::Additive).await
    }

    pub async fn open(database_url: &str, policy: MigrationPolicy) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every pooled connection to an in-memory url would see its own database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;

        match MIGRATOR.run(&pool).await {
            Ok(()) => {}
            Err(err) if policy == MigrationPolicy::ResetOnMismatch && is_schema_mismatch(&err) => {
                warn!(%database_url, error = %err, "schema mismatch; resetting saved quotes database");
                drop_all_tables(&pool).await?;
                MIGRATOR
                    .run(&pool)
                    .await
                    .context("failed to migrate database after schema reset")?;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to migrate saved quotes database '{database_url}'")
                })
            }
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Highest successfully applied migration version.
    pub async fn schema_version(&self) -> Result<i64> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations WHERE success = 1",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to read schema version")?;
        Ok(version)
    }

    pub async fn ensure_quote_list(&self, owner_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO quote_lists (owner_id) VALUES (?1)")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create quote list for '{owner_id}'"))?;
        Ok(())
    }

    /// Saved quotes of one owner, oldest first.
    pub async fn list_saved_quotes(&self, owner_id: &str) -> Result<Vec<SavedQuote>> {
        let rows = sqlx::query(
            r#"
            SELECT quote_id, text, author, image_url, character_count, html_formatted
            FROM saved_quotes
            WHERE owner_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list saved quotes for '{owner_id}'"))?;

        rows.iter().map(saved_quote_from_row).collect()
    }

    /// Returns false when the owner already saved a quote with the same text.
    pub async fn insert_saved_quote(&self, owner_id: &str, quote: &SavedQuote) -> Result<bool> {
        self.ensure_quote_list(owner_id).await?;
        let result = sqlx::query(
            r#"
            INSERT INTO saved_quotes
                (owner_id, quote_id, text, author, image_url, character_count, html_formatted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (owner_id, text) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(&quote.id)
        .bind(&quote.text)
        .bind(&quote.author)
        .bind(&quote.image_url)
        .bind(i64::from(quote.length))
        .bind(&quote.html_formatted)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save quote for '{owner_id}'"))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_saved_quotes(&self, owner_id: &str, quote_ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for quote_id in quote_ids {
            removed += sqlx::query("DELETE FROM saved_quotes WHERE owner_id = ?1 AND quote_id = ?2")
                .bind(owner_id)
                .bind(quote_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to delete saved quote '{quote_id}'"))?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn delete_saved_quotes_by_text(&self, owner_id: &str, text: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM saved_quotes WHERE owner_id = ?1 AND text = ?2")
            .bind(owner_id)
            .bind(text)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete saved quotes for '{owner_id}'"))?;
        Ok(result.rows_affected())
    }

    /// Returns `None` when an account with this email already exists.
    pub async fn create_account(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<AccountId>> {
        let result = sqlx::query(
            "INSERT INTO accounts (email, password_hash) VALUES (?1, ?2) ON CONFLICT (email) DO NOTHING",
        )
        .bind(email)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .context("failed to create account")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let account_id = AccountId(result.last_insert_rowid());
        info!(account_id = account_id.0, "created account");
        Ok(Some(account_id))
    }

    pub async fn find_account_by_email(&self, email: &str) -> Result<Option<StoredAccount>> {
        let row = sqlx::query(
            "SELECT account_id, email, password_hash FROM accounts WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up account")?;

        row.map(|row| -> Result<StoredAccount> {
            Ok(StoredAccount {
                account_id: AccountId(row.try_get("account_id")?),
                email: row.try_get("email")?,
                password_hash: row.try_get("password_hash")?,
            })
        })
        .transpose()
    }
}

fn saved_quote_from_row(row: &SqliteRow) -> Result<SavedQuote> {
    let character_count: i64 = row.try_get("character_count")?;
    Ok(SavedQuote {
        id: row.try_get("quote_id")?,
        text: row.try_get("text")?,
        author: row.try_get("author")?,
        image_url: row.try_get("image_url")?,
        length: u32::try_from(character_count).unwrap_or_default(),
        html_formatted: row.try_get("html_formatted")?,
    })
}

fn is_schema_mismatch(err: &MigrateError) -> bool {
    matches!(
        err,
        MigrateError::VersionMissing(_) | MigrateError::VersionMismatch(_) | MigrateError::Dirty(_)
    )
}

async fn drop_all_tables(pool: &Pool<Sqlite>) -> Result<()> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(pool)
    .await
    .context("failed to list tables for schema reset")?;

    for table in tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table.replace('"', "\"\"")))
            .execute(pool)
            .await
            .with_context(|| format!("failed to drop table '{table}'"))?;
    }
    Ok(())
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
