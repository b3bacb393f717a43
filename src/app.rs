use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dptree;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::types::UserId;
use tokio::time::sleep;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bot;
use crate::bot::AppContext;
use crate::bot::DialogueStorage;
use crate::db::Db;

const SHUTDOWN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

pub struct App {
  bot: Bot,
  context: Arc<AppContext>,
  handler: UpdateHandler<anyhow::Error>,
}

impl App {
  pub fn new(bot: Bot, db: Db, admin_id: UserId, channel_id: ChatId) -> Self {
    let context = Arc::new(AppContext::new(db, admin_id, channel_id));
    let handler = bot::build_schema();
    Self { bot, context, handler }
  }

  pub async fn run(self) -> anyhow::Result<()> {
    let storage: Arc<DialogueStorage> = InMemStorage::new();

    let me = self.bot.get_me().await?;
    info!(username = me.username(), "bot identity resolved");

    let mut dispatcher = Dispatcher::builder(self.bot.clone(), self.handler)
      .dependencies(dptree::deps![self.context.clone(), storage.clone(), me])
      .error_handler(LoggingErrorHandler::with_custom_text("error while handling update"))
      .enable_ctrlc_handler()
      .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
      wait_for_terminate().await;
      info!("received termination signal, stopping dispatcher");
      shutdown_when_running(|| shutdown.shutdown()).await;
    });

    dispatcher.dispatch().await;

    self.context.db().close().await;
    info!("bot shutdown complete");
    Ok(())
  }
}

/// The dispatcher refuses to stop before it has started, so a signal that
/// arrives during startup keeps retrying until the request is accepted.
async fn shutdown_when_running<F, S, E>(mut request: F)
where
  F: FnMut() -> Result<S, E>,
  S: Future<Output = ()>,
  E: Display,
{
  loop {
    match request() {
      Ok(stopped) => return stopped.await,
      Err(err) => {
        debug!(error = %err, "dispatcher not running yet, retrying shutdown");
        sleep(SHUTDOWN_RETRY_INTERVAL).await;
      },
    }
  }
}

#[cfg(unix)]
async fn wait_for_terminate() {
  use tokio::signal::unix::SignalKind;
  use tokio::signal::unix::signal;

  match signal(SignalKind::terminate()) {
    Ok(mut stream) => {
      stream.recv().await;
    },
    Err(err) => {
      warn!(error = %err, "failed to install SIGTERM handler");
      std::future::pending::<()>().await;
    },
  }
}

#[cfg(not(unix))]
async fn wait_for_terminate() {
  std::future::pending::<()>().await;
}
