use std::sync::Arc;

use anyhow::Context;
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::Dialogue;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::types::FileId;
use teloxide::types::InlineKeyboardMarkup;
use teloxide::types::InputFile;
use teloxide::types::KeyboardButton;
use teloxide::types::KeyboardMarkup;
use teloxide::types::KeyboardRemove;
use teloxide::types::Message;
use teloxide::types::ParseMode;
use teloxide::types::ReplyMarkup;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::bot::Command;
use crate::bot::DialogueStorage;
use crate::bot::HandlerResult;
use crate::bot::context::AppContext;
use crate::bot::flow;
use crate::bot::flow::AuthoringError;
use crate::bot::flow::Input;
use crate::bot::flow::NewEntry;
use crate::bot::flow::Reply;
use crate::bot::flow::Step;
use crate::bot::state::ConversationState;
use crate::bot::state::PendingEntry;
use crate::buttons::link_keyboard;
use crate::db::StoreError;
use crate::models::EntryRow;

type SharedContext = Arc<AppContext>;
type BotDialogue = Dialogue<ConversationState, DialogueStorage>;

const STORED_TEXT: &str = "Message stored successfully!";
const STORED_WITH_KEYBOARD_TEXT: &str = "Message stored successfully with inline keyboard!";
const STORE_FAILED_TEXT: &str = "Failed to store message. Please try again.";
const CHANNEL_FAILED_TEXT: &str = "Message stored, but posting it to the channel failed.";
const BUTTONS_DROPPED_TEXT: &str = "Message stored and posted, but some buttons could not be posted. Check their links.";

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .enter_dialogue::<Message, DialogueStorage, ConversationState>()
    .branch(command_branch())
    .branch(dptree::case![ConversationState::AwaitingPhoto].endpoint(handle_photo_message))
    .branch(dptree::case![ConversationState::AwaitingKeyboardChoice(pending)].endpoint(handle_keyboard_choice))
    .branch(dptree::case![ConversationState::AwaitingButtonDetails(pending)].endpoint(handle_button_details))
    .branch(dptree::endpoint(handle_idle_message));

  dptree::entry().branch(message_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start].endpoint(handle_start))
    .branch(dptree::case![Command::Cancel].endpoint(handle_cancel))
    .branch(dptree::case![Command::Help].endpoint(handle_help))
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_start(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  let user = msg.from.as_ref().context("message missing sender")?;
  info!(user_id = %user.id, chat_id = %msg.chat.id, "received /start command");
  let is_admin = ctx.is_admin(user.id);
  if !is_admin {
    warn!(user_id = %user.id, "unauthorized /start attempt");
  }
  apply(&bot, &dialogue, &ctx, &msg, flow::start(is_admin)).await
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_cancel(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /cancel command");
  apply(&bot, &dialogue, &ctx, &msg, Ok(flow::cancel())).await
}

#[instrument(skip(bot, msg))]
async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /help command");
  let mut text = Command::descriptions().to_string();
  text.push_str("\n\nSend a text that matches a stored caption to get the stored post back.");
  bot.send_message(msg.chat.id, text).await?;
  Ok(())
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_photo_message(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  let is_admin = sender_is_admin(&ctx, &msg);
  info!(chat_id = %msg.chat.id, is_admin, "handling photo stage input");
  let input = Input::from_message(&msg);
  let step = if is_admin {
    flow::on_photo(is_admin, input)
  } else {
    flow::on_outsider(msg.chat.is_private(), input)
  };
  apply(&bot, &dialogue, &ctx, &msg, step).await
}

#[instrument(skip(bot, ctx, dialogue, msg, pending))]
async fn handle_keyboard_choice(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  pending: PendingEntry,
) -> HandlerResult {
  let is_admin = sender_is_admin(&ctx, &msg);
  info!(chat_id = %msg.chat.id, is_admin, "handling keyboard choice");
  let input = Input::from_message(&msg);
  let step = if is_admin {
    flow::on_keyboard_choice(pending, is_admin, input)
  } else {
    flow::on_outsider(msg.chat.is_private(), input)
  };
  apply(&bot, &dialogue, &ctx, &msg, step).await
}

#[instrument(skip(bot, ctx, dialogue, msg, pending))]
async fn handle_button_details(
  bot: Bot,
  dialogue: BotDialogue,
  ctx: SharedContext,
  msg: Message,
  pending: PendingEntry,
) -> HandlerResult {
  let is_admin = sender_is_admin(&ctx, &msg);
  info!(chat_id = %msg.chat.id, is_admin, "handling button details");
  let input = Input::from_message(&msg);
  let step = if is_admin {
    flow::on_button_details(pending, is_admin, input)
  } else {
    flow::on_outsider(msg.chat.is_private(), input)
  };
  apply(&bot, &dialogue, &ctx, &msg, step).await
}

#[instrument(skip(bot, ctx, dialogue, msg))]
async fn handle_idle_message(bot: Bot, dialogue: BotDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  if msg.text().is_some_and(|text| text.starts_with('/')) {
    // unknown command, nothing to match against
    return Ok(());
  }
  let is_admin = sender_is_admin(&ctx, &msg);
  apply(&bot, &dialogue, &ctx, &msg, flow::on_idle(is_admin, Input::from_message(&msg))).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionChange {
  Keep,
  Set(ConversationState),
  Reset,
}

/// What happens to the stored dialogue for a given step. A commit always
/// ends the session, whatever the outcome of the store and the channel post.
fn session_change(step: &Result<Step, AuthoringError>) -> SessionChange {
  match step {
    Ok(Step::Prompt { next, .. }) if next.is_active() => SessionChange::Set(next.clone()),
    Ok(Step::Prompt { .. }) | Ok(Step::Commit(_)) => SessionChange::Reset,
    Ok(Step::Passive) | Ok(Step::Ignore) => SessionChange::Keep,
    Err(err) if err.ends_session() => SessionChange::Reset,
    Err(_) => SessionChange::Keep,
  }
}

/// Carries out whatever the flow decided for this message.
async fn apply(
  bot: &Bot,
  dialogue: &BotDialogue,
  ctx: &SharedContext,
  msg: &Message,
  step: Result<Step, AuthoringError>,
) -> HandlerResult {
  let chat_id = msg.chat.id;
  match session_change(&step) {
    SessionChange::Keep => {},
    SessionChange::Set(next) => dialogue.update(next).await?,
    SessionChange::Reset => dialogue.reset().await?,
  }

  match step {
    Ok(Step::Prompt { reply, .. }) => {
      let mut request = bot.send_message(chat_id, reply.text());
      if let Some(markup) = reply_markup(reply) {
        request = request.reply_markup(markup);
      }
      request.await?;
    },
    Ok(Step::Commit(entry)) => commit_entry(bot, ctx, chat_id, entry).await?,
    Ok(Step::Passive) => {
      let Some(user) = msg.from.as_ref() else {
        warn!(chat_id = %chat_id, "text message without sender");
        return Ok(());
      };
      if let Some(text) = msg.text() {
        reply_with_match(bot, ctx, chat_id, user, text).await?;
      }
    },
    Ok(Step::Ignore) => {},
    Err(err) => {
      warn!(chat_id = %chat_id, error = %err, "authoring input rejected");
      bot.send_message(chat_id, err.user_message()).await?;
    },
  }
  Ok(())
}

fn reply_markup(reply: Reply) -> Option<ReplyMarkup> {
  match reply {
    Reply::AskKeyboardChoice => Some(yes_no_keyboard().into()),
    Reply::AskButtonDetails | Reply::Cancelled => Some(KeyboardRemove::new().into()),
    Reply::Welcome | Reply::AskForCaption => None,
  }
}

fn yes_no_keyboard() -> KeyboardMarkup {
  KeyboardMarkup::new(vec![vec![KeyboardButton::new("Yes"), KeyboardButton::new("No")]])
    .one_time_keyboard()
    .resize_keyboard()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitOutcome {
  StoreFailed,
  PostFailed,
  Posted { rendered_buttons: usize, stored_buttons: usize },
}

impl CommitOutcome {
  /// `posted` is `None` when the post was never attempted.
  fn from_results<E>(
    stored: &Result<i64, StoreError>,
    posted: Option<&Result<(), E>>,
    rendered_buttons: usize,
    stored_buttons: usize,
  ) -> Self {
    match (stored, posted) {
      (Err(_), _) => Self::StoreFailed,
      (Ok(_), Some(Ok(()))) => Self::Posted {
        rendered_buttons,
        stored_buttons,
      },
      (Ok(_), Some(Err(_)) | None) => Self::PostFailed,
    }
  }

  fn admin_notice(self) -> &'static str {
    match self {
      Self::StoreFailed => STORE_FAILED_TEXT,
      Self::PostFailed => CHANNEL_FAILED_TEXT,
      Self::Posted {
        rendered_buttons,
        stored_buttons,
      } if rendered_buttons < stored_buttons => BUTTONS_DROPPED_TEXT,
      Self::Posted { stored_buttons: 0, .. } => STORED_TEXT,
      Self::Posted { .. } => STORED_WITH_KEYBOARD_TEXT,
    }
  }
}

/// Stores the entry, then posts it to the channel. Failures are reported to
/// the admin and never retried.
#[instrument(skip(bot, ctx, entry), fields(button_count = entry.buttons.len()))]
async fn commit_entry(bot: &Bot, ctx: &SharedContext, admin_chat: ChatId, entry: NewEntry) -> HandlerResult {
  let stored = ctx.db().insert_entry(&entry.text, &entry.photo_id, &entry.buttons).await;
  let keyboard = link_keyboard(&entry.buttons);
  let channel = ctx.channel_id();

  let posted = match &stored {
    Ok(entry_id) => {
      let result = send_entry_photo(bot, channel, &entry.photo_id, entry.text.clone(), keyboard.markup, None)
        .await
        .map(|_| ());
      match &result {
        Ok(()) => info!(entry_id, channel_id = %channel, rendered = keyboard.rendered, "entry posted to channel"),
        Err(err) => warn!(error = %err, entry_id, channel_id = %channel, "failed to post entry to channel"),
      }
      Some(result)
    },
    Err(err) => {
      warn!(error = %err, "failed to store entry");
      None
    },
  };

  let outcome = CommitOutcome::from_results(&stored, posted.as_ref(), keyboard.rendered, entry.buttons.len());
  if outcome != CommitOutcome::StoreFailed && keyboard.rendered < entry.buttons.len() {
    warn!(
      rendered = keyboard.rendered,
      stored = entry.buttons.len(),
      "some buttons could not be rendered"
    );
  }
  bot
    .send_message(admin_chat, outcome.admin_notice())
    .reply_markup(KeyboardRemove::new())
    .await?;
  Ok(())
}

/// A failed lookup is logged and treated like no match.
fn matched_entry(found: Result<Option<EntryRow>, StoreError>) -> Option<EntryRow> {
  match found {
    Ok(entry) => entry,
    Err(err) => {
      warn!(error = %err, "failed to look up entry");
      None
    },
  }
}

#[instrument(skip(bot, ctx, user, text), fields(user_id = %user.id))]
async fn reply_with_match(bot: &Bot, ctx: &SharedContext, chat: ChatId, user: &User, text: &str) -> HandlerResult {
  let Some(entry) = matched_entry(ctx.db().find_entry_by_text(text).await) else {
    return Ok(());
  };

  info!(entry_id = entry.id, created_at = %entry.created_at, chat_id = %chat, "found matching entry");
  let caption = render_match_caption(user, &entry);
  send_entry_photo(
    bot,
    chat,
    &entry.photo_id,
    caption,
    link_keyboard(&entry.buttons).markup,
    Some(ParseMode::Html),
  )
  .await?;
  Ok(())
}

async fn send_entry_photo(
  bot: &Bot,
  chat: ChatId,
  photo_id: &FileId,
  caption: String,
  keyboard: Option<InlineKeyboardMarkup>,
  parse_mode: Option<ParseMode>,
) -> Result<Message, teloxide::RequestError> {
  let mut request = bot.send_photo(chat, InputFile::file_id(photo_id.clone())).caption(caption);
  if let Some(keyboard) = keyboard {
    request = request.reply_markup(keyboard);
  }
  if let Some(mode) = parse_mode {
    request = request.parse_mode(mode);
  }
  request.await
}

/// Sender mention on the first line, stored caption below, as HTML.
fn render_match_caption(user: &User, entry: &EntryRow) -> String {
  format!(
    "{}\n{}",
    html::user_mention(user.id, &user.first_name),
    html::escape(&entry.text)
  )
}

fn sender_is_admin(ctx: &SharedContext, msg: &Message) -> bool {
  msg.from.as_ref().is_some_and(|user| ctx.is_admin(user.id))
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use teloxide::types::KeyboardMarkup;
  use teloxide::types::ReplyMarkup;
  use teloxide::types::User;
  use teloxide::types::UserId;

  use super::BUTTONS_DROPPED_TEXT;
  use super::CHANNEL_FAILED_TEXT;
  use super::CommitOutcome;
  use super::Reply;
  use super::STORE_FAILED_TEXT;
  use super::STORED_TEXT;
  use super::STORED_WITH_KEYBOARD_TEXT;
  use super::SessionChange;
  use super::matched_entry;
  use super::render_match_caption;
  use super::reply_markup;
  use super::session_change;
  use super::yes_no_keyboard;
  use crate::bot::flow::AuthoringError;
  use crate::bot::flow::NewEntry;
  use crate::bot::flow::Step;
  use crate::bot::state::ConversationState;
  use crate::bot::state::PendingEntry;
  use crate::buttons::link_keyboard;
  use crate::buttons::parse_button_lines;
  use crate::db::StoreError;
  use crate::models::EntryRow;

  fn user(id: u64, first_name: &str) -> User {
    User {
      id: UserId(id),
      is_bot: false,
      first_name: first_name.to_string(),
      last_name: None,
      username: None,
      language_code: None,
      is_premium: false,
      added_to_attachment_menu: false,
    }
  }

  fn entry(text: &str) -> EntryRow {
    EntryRow {
      id: 1,
      text: text.to_string(),
      photo_id: "photo-1".to_string().into(),
      buttons: vec!["Docs - https://example.com".to_string()],
      created_at: Utc::now(),
    }
  }

  #[test]
  fn caption_starts_with_sender_mention() {
    let caption = render_match_caption(&user(42, "Alice"), &entry("Hello"));
    let (mention, text) = caption.split_once('\n').unwrap();
    assert!(mention.contains("tg://user?id=42"));
    assert!(mention.contains("Alice"));
    assert_eq!(text, "Hello");
  }

  #[test]
  fn caption_text_is_html_escaped() {
    let caption = render_match_caption(&user(1, "Bob"), &entry("<b>Sale</b> & more"));
    assert!(caption.ends_with("&lt;b&gt;Sale&lt;/b&gt; &amp; more"));
  }

  #[test]
  fn yes_no_keyboard_is_one_time() {
    let keyboard: KeyboardMarkup = yes_no_keyboard();
    assert_eq!(keyboard.keyboard.len(), 1);
    assert_eq!(keyboard.keyboard[0].len(), 2);
    assert_eq!(keyboard.keyboard[0][0].text, "Yes");
    assert_eq!(keyboard.keyboard[0][1].text, "No");
    assert!(keyboard.one_time_keyboard);
  }

  #[test]
  fn prompts_pick_matching_markup() {
    assert!(matches!(reply_markup(Reply::AskKeyboardChoice), Some(ReplyMarkup::Keyboard(_))));
    assert!(matches!(reply_markup(Reply::AskButtonDetails), Some(ReplyMarkup::KeyboardRemove(_))));
    assert!(matches!(reply_markup(Reply::Cancelled), Some(ReplyMarkup::KeyboardRemove(_))));
    assert!(reply_markup(Reply::Welcome).is_none());
  }

  fn write_failure() -> Result<i64, StoreError> {
    Err(StoreError::Write(sqlx::Error::PoolClosed))
  }

  #[test]
  fn store_failure_is_reported_and_nothing_is_posted() {
    let outcome = CommitOutcome::from_results(&write_failure(), None::<&Result<(), &str>>, 0, 1);
    assert_eq!(outcome, CommitOutcome::StoreFailed);
    assert_eq!(outcome.admin_notice(), STORE_FAILED_TEXT);
  }

  #[test]
  fn channel_failure_is_reported() {
    let outcome = CommitOutcome::from_results(&Ok(7), Some(&Err("bot was kicked")), 1, 1);
    assert_eq!(outcome, CommitOutcome::PostFailed);
    assert_eq!(outcome.admin_notice(), CHANNEL_FAILED_TEXT);
  }

  #[test]
  fn successful_post_confirms_with_or_without_keyboard() {
    let plain = CommitOutcome::from_results(&Ok(1), Some(&Ok::<(), &str>(())), 0, 0);
    assert_eq!(plain.admin_notice(), STORED_TEXT);
    let with_buttons = CommitOutcome::from_results(&Ok(1), Some(&Ok::<(), &str>(())), 2, 2);
    assert_eq!(with_buttons.admin_notice(), STORED_WITH_KEYBOARD_TEXT);
  }

  #[test]
  fn unrenderable_button_is_reported_to_admin() {
    let buttons = parse_button_lines("Docs - httpfoo");
    assert_eq!(buttons.len(), 1);
    let keyboard = link_keyboard(&buttons);
    let outcome = CommitOutcome::from_results(&Ok(1), Some(&Ok::<(), &str>(())), keyboard.rendered, buttons.len());
    assert_eq!(outcome.admin_notice(), BUTTONS_DROPPED_TEXT);

    let partial = CommitOutcome::from_results(&Ok(1), Some(&Ok::<(), &str>(())), 1, 2);
    assert_eq!(partial.admin_notice(), BUTTONS_DROPPED_TEXT);
  }

  #[test]
  fn commit_ends_session_regardless_of_outcome() {
    let entry = NewEntry {
      text: "Hello".to_string(),
      photo_id: "photo-1".to_string().into(),
      buttons: Vec::new(),
    };
    assert_eq!(session_change(&Ok(Step::Commit(entry))), SessionChange::Reset);
  }

  #[test]
  fn session_follows_the_step() {
    let pending = PendingEntry::new("photo-1".to_string().into(), "Hello");
    let next = ConversationState::AwaitingKeyboardChoice(pending);
    assert_eq!(
      session_change(&Ok(Step::Prompt {
        next: next.clone(),
        reply: Reply::AskKeyboardChoice,
      })),
      SessionChange::Set(next)
    );
    assert_eq!(
      session_change(&Ok(Step::Prompt {
        next: ConversationState::Idle,
        reply: Reply::Cancelled,
      })),
      SessionChange::Reset
    );
    assert_eq!(session_change(&Ok(Step::Passive)), SessionChange::Keep);
    assert_eq!(session_change(&Ok(Step::Ignore)), SessionChange::Keep);
    assert_eq!(session_change(&Err(AuthoringError::NoValidButtons)), SessionChange::Keep);
    assert_eq!(session_change(&Err(AuthoringError::Unauthorized)), SessionChange::Reset);
  }

  #[test]
  fn no_match_or_failed_lookup_sends_nothing() {
    assert!(matched_entry(Ok(None)).is_none());
    assert!(matched_entry(Err(StoreError::Read(sqlx::Error::RowNotFound))).is_none());
    let found = matched_entry(Ok(Some(entry("Hello")))).unwrap();
    assert_eq!(found.text, "Hello");
  }
}
