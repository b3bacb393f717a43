mod app;
mod bot;
mod buttons;
mod config;
mod db;
mod models;
mod telemetry;

use anyhow::Result;
use teloxide::prelude::Bot;
use tracing::error;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  dotenv::dotenv().ok();
  telemetry::init()?;

  let config = match config::Config::from_env() {
    Ok(config) => config,
    Err(err) => {
      error!(error = %err, "invalid configuration, check your environment variables");
      return Ok(());
    },
  };
  info!(admin_id = %config.admin_id, channel_id = %config.channel_id, "starting bot");

  let db = match db::Db::connect(&config.database_url).await {
    Ok(db) => db,
    Err(err) => {
      error!(error = %err, "failed to initialize database");
      return Ok(());
    },
  };
  match db.count_entries().await {
    Ok(count) => info!(entries = count, "connected to database"),
    Err(err) => error!(error = %err, "database connected but entries are unreadable"),
  }

  let bot = Bot::new(config.bot_token.clone());
  let app = app::App::new(bot, db, config.admin_id, config.channel_id);
  app.run().await
}
