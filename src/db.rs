use sqlx::Pool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::migrate::MigrateError;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::postgres::PgRow;
use teloxide::types::FileId;
use thiserror::Error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::models::EntryRow;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to connect to the database: {0}")]
  Connection(#[source] sqlx::Error),
  #[error("failed to apply migrations: {0}")]
  Migration(#[from] MigrateError),
  #[error("failed to store entry: {0}")]
  Write(#[source] sqlx::Error),
  #[error("failed to read entries: {0}")]
  Read(#[source] sqlx::Error),
}

#[derive(Clone)]
pub struct Db {
  pool: Pool<Postgres>,
}

impl Db {
  pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
    let pool = PgPoolOptions::new()
      .max_connections(5)
      .connect(database_url)
      .await
      .map_err(StoreError::Connection)?;
    MIGRATOR.run(&pool).await?;
    Ok(Self { pool })
  }

  /// Appends an entry. Duplicate texts are accepted.
  #[instrument(skip(self, photo_id, buttons), fields(text_len = text.len(), button_count = buttons.len()))]
  pub async fn insert_entry(&self, text: &str, photo_id: &FileId, buttons: &[String]) -> Result<i64, StoreError> {
    let id = sqlx::query_scalar::<_, i64>(
      r#"
      INSERT INTO entries (text, photo_id, buttons)
      VALUES ($1, $2, $3)
      RETURNING id
      "#,
    )
    .bind(text)
    .bind(photo_id.to_string())
    .bind(buttons)
    .fetch_one(&self.pool)
    .await
    .map_err(StoreError::Write)?;
    info!(entry_id = id, "stored entry");
    Ok(id)
  }

  /// Exact, case-sensitive lookup. The most recently inserted entry wins
  /// when several share the same text.
  #[instrument(skip(self), fields(text_len = text.len()))]
  pub async fn find_entry_by_text(&self, text: &str) -> Result<Option<EntryRow>, StoreError> {
    let row = sqlx::query(
      r#"
      SELECT id, text, photo_id, buttons, created_at
      FROM entries
      WHERE text = $1
      ORDER BY id DESC
      LIMIT 1
      "#,
    )
    .bind(text)
    .fetch_optional(&self.pool)
    .await
    .map_err(StoreError::Read)?;

    row.map(|row| entry_from_row(&row)).transpose().map_err(StoreError::Read)
  }

  #[instrument(skip(self))]
  pub async fn count_entries(&self) -> Result<i64, StoreError> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entries")
      .fetch_one(&self.pool)
      .await
      .map_err(StoreError::Read)
  }

  pub async fn close(&self) {
    if self.pool.is_closed() {
      warn!("database pool already closed");
      return;
    }
    self.pool.close().await;
    info!("closed database pool");
  }
}

fn entry_from_row(row: &PgRow) -> Result<EntryRow, sqlx::Error> {
  Ok(EntryRow {
    id: row.try_get("id")?,
    text: row.try_get("text")?,
    photo_id: row.try_get::<String, _>("photo_id")?.into(),
    buttons: row.try_get("buttons")?,
    created_at: row.try_get("created_at")?,
  })
}
