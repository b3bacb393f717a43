//! Authoring flow for auto-response entries.
//!
//! Every function here is a pure transition: it inspects the current session
//! data and the incoming message and returns what should happen next. The
//! handlers perform the actual I/O.

use teloxide::types::FileId;
use teloxide::types::Message;
use thiserror::Error;

use crate::bot::state::ConversationState;
use crate::bot::state::PendingEntry;
use crate::buttons::BUTTON_FORMAT_HINT;
use crate::buttons::parse_button_lines;

/// The parts of an incoming message the flow cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
  Photo { file_id: FileId, caption: Option<&'a str> },
  Text(&'a str),
  Other,
}

impl<'a> Input<'a> {
  pub fn from_message(msg: &'a Message) -> Self {
    // Telegram sends every size of a photo; the last one is the largest.
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
      return Self::Photo {
        file_id: photo.file.id.clone(),
        caption: msg.caption().filter(|caption| !caption.trim().is_empty()),
      };
    }
    match msg.text() {
      Some(text) => Self::Text(text),
      None => Self::Other,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
  Welcome,
  AskForCaption,
  AskKeyboardChoice,
  AskButtonDetails,
  Cancelled,
}

impl Reply {
  pub fn text(self) -> String {
    match self {
      Self::Welcome => "Welcome! Send me a photo with caption to create a new auto-response message.".to_string(),
      Self::AskForCaption => "Please send the photo with a caption!".to_string(),
      Self::AskKeyboardChoice => "Would you like to add an inline keyboard?".to_string(),
      Self::AskButtonDetails => {
        format!("Please send the button details in format:\n{BUTTON_FORMAT_HINT}\nOne button per line.")
      },
      Self::Cancelled => "Operation cancelled.".to_string(),
    }
  }
}

/// A finished session, ready to be stored and posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
  pub text: String,
  pub photo_id: FileId,
  pub buttons: Vec<String>,
}

impl NewEntry {
  fn from_pending(pending: PendingEntry, buttons: Vec<String>) -> Self {
    Self {
      text: pending.text,
      photo_id: pending.photo_id,
      buttons,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
  /// Move to `next` (possibly the same state) and answer with `reply`.
  Prompt { next: ConversationState, reply: Reply },
  /// Authoring is complete; the session ends after the commit attempt.
  Commit(NewEntry),
  /// Not part of an authoring session; hand the text to the passive matcher.
  Passive,
  Ignore,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthoringError {
  #[error("sender is not the admin")]
  Unauthorized,
  #[error("photo sent without caption")]
  MissingCaption,
  #[error("expected a photo")]
  PhotoRequired,
  #[error("expected a yes/no answer")]
  ChoiceRequired,
  #[error("no valid button lines")]
  NoValidButtons,
}

impl AuthoringError {
  pub fn user_message(&self) -> String {
    match self {
      Self::Unauthorized => "Sorry, you're not authorized to use this bot.".to_string(),
      Self::MissingCaption => Reply::AskForCaption.text(),
      Self::PhotoRequired => "Please send a photo with a caption, or /cancel to stop.".to_string(),
      Self::ChoiceRequired => "Please answer Yes or No.".to_string(),
      Self::NoValidButtons => format!("Invalid button format! Please use:\n{BUTTON_FORMAT_HINT}"),
    }
  }

  /// Validation problems keep the session where it is.
  pub fn ends_session(&self) -> bool {
    matches!(self, Self::Unauthorized)
  }
}

pub fn start(is_admin: bool) -> Result<Step, AuthoringError> {
  if !is_admin {
    return Err(AuthoringError::Unauthorized);
  }
  Ok(Step::Prompt {
    next: ConversationState::AwaitingPhoto,
    reply: Reply::Welcome,
  })
}

pub fn cancel() -> Step {
  Step::Prompt {
    next: ConversationState::Idle,
    reply: Reply::Cancelled,
  }
}

/// No session is active. Plain text goes to the passive matcher; a photo from
/// the admin opens a session directly.
pub fn on_idle(is_admin: bool, input: Input<'_>) -> Result<Step, AuthoringError> {
  match input {
    Input::Text(_) => Ok(Step::Passive),
    Input::Photo { caption: None, .. } if is_admin => Ok(Step::Prompt {
      next: ConversationState::AwaitingPhoto,
      reply: Reply::AskForCaption,
    }),
    Input::Photo { .. } if is_admin => on_photo(is_admin, input),
    _ => Ok(Step::Ignore),
  }
}

pub fn on_photo(is_admin: bool, input: Input<'_>) -> Result<Step, AuthoringError> {
  authorize(is_admin)?;
  match input {
    Input::Photo {
      file_id,
      caption: Some(caption),
    } => Ok(Step::Prompt {
      next: ConversationState::AwaitingKeyboardChoice(PendingEntry::new(file_id, caption)),
      reply: Reply::AskKeyboardChoice,
    }),
    Input::Photo { caption: None, .. } => Err(AuthoringError::MissingCaption),
    Input::Text(_) | Input::Other => Err(AuthoringError::PhotoRequired),
  }
}

pub fn on_keyboard_choice(pending: PendingEntry, is_admin: bool, input: Input<'_>) -> Result<Step, AuthoringError> {
  authorize(is_admin)?;
  let Input::Text(answer) = input else {
    return Err(AuthoringError::ChoiceRequired);
  };
  if answer.trim().eq_ignore_ascii_case("yes") {
    return Ok(Step::Prompt {
      next: ConversationState::AwaitingButtonDetails(pending),
      reply: Reply::AskButtonDetails,
    });
  }
  Ok(Step::Commit(NewEntry::from_pending(pending, Vec::new())))
}

pub fn on_button_details(pending: PendingEntry, is_admin: bool, input: Input<'_>) -> Result<Step, AuthoringError> {
  authorize(is_admin)?;
  let Input::Text(details) = input else {
    return Err(AuthoringError::NoValidButtons);
  };
  let buttons = parse_button_lines(details);
  if buttons.is_empty() {
    return Err(AuthoringError::NoValidButtons);
  }
  Ok(Step::Commit(NewEntry::from_pending(pending, buttons)))
}

/// A non-admin wrote into a chat with an active session. In a private chat the
/// session is theirs by construction, so it ends with a rejection. In a group
/// the admin's session is left alone and the message is treated as if idle.
pub fn on_outsider(private_chat: bool, input: Input<'_>) -> Result<Step, AuthoringError> {
  if private_chat {
    return Err(AuthoringError::Unauthorized);
  }
  on_idle(false, input)
}

fn authorize(is_admin: bool) -> Result<(), AuthoringError> {
  if is_admin {
    Ok(())
  } else {
    Err(AuthoringError::Unauthorized)
  }
}
