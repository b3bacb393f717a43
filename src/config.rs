use std::env;

use teloxide::types::ChatId;
use teloxide::types::UserId;
use thiserror::Error;

const REQUIRED_VARS: [&str; 4] = ["BOT_TOKEN", "ADMIN_ID", "CHANNEL_ID", "DATABASE_URL"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("missing required environment variables: {}", .0.join(", "))]
  Missing(Vec<&'static str>),
  #[error("{name} must be an integer id, got {value:?}")]
  Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub database_url: String,
  pub admin_id: UserId,
  pub channel_id: ChatId,
}

impl Config {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| env::var(name).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let value = |name: &str| {
      let raw = match name {
        "BOT_TOKEN" => lookup("BOT_TOKEN").or_else(|| lookup("TELOXIDE_TOKEN")),
        _ => lookup(name),
      };
      raw.filter(|v| !v.trim().is_empty())
    };

    let missing: Vec<&'static str> = REQUIRED_VARS
      .into_iter()
      .filter(|name| value(*name).is_none())
      .collect();
    if !missing.is_empty() {
      return Err(ConfigError::Missing(missing));
    }

    // Presence was checked above.
    let bot_token = value("BOT_TOKEN").unwrap_or_default();
    let database_url = value("DATABASE_URL").unwrap_or_default();
    let admin_raw = value("ADMIN_ID").unwrap_or_default();
    let channel_raw = value("CHANNEL_ID").unwrap_or_default();

    let admin_id = admin_raw
      .trim()
      .parse::<u64>()
      .map(UserId)
      .map_err(|_| ConfigError::Invalid {
        name: "ADMIN_ID",
        value: admin_raw.clone(),
      })?;
    let channel_id = parse_chat_id(&channel_raw).ok_or_else(|| ConfigError::Invalid {
      name: "CHANNEL_ID",
      value: channel_raw.clone(),
    })?;

    Ok(Self {
      bot_token,
      database_url,
      admin_id,
      channel_id,
    })
  }
}

fn parse_chat_id(raw: &str) -> Option<ChatId> {
  raw.trim().parse::<i64>().ok().map(ChatId)
}
