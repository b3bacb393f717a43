use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use teloxide::types::FileId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryRow {
  pub id: i64,
  pub text: String, // trigger and caption
  pub photo_id: FileId,
  pub buttons: Vec<String>,
  pub created_at: DateTime<Utc>,
}
