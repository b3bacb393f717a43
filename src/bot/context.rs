use teloxide::types::ChatId;
use teloxide::types::UserId;

use crate::db::Db;

#[derive(Clone)]
pub struct AppContext {
  db: Db,
  admin_id: UserId,
  channel_id: ChatId,
}

impl AppContext {
  pub fn new(db: Db, admin_id: UserId, channel_id: ChatId) -> Self {
    Self {
      db,
      admin_id,
      channel_id,
    }
  }

  pub fn db(&self) -> &Db {
    &self.db
  }

  pub fn channel_id(&self) -> ChatId {
    self.channel_id
  }

  pub fn is_admin(&self, user_id: UserId) -> bool {
    self.admin_id == user_id
  }
}
