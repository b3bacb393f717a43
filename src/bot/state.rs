use serde::Deserialize;
use serde::Serialize;
use teloxide::types::FileId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum ConversationState {
  #[default]
  Idle,
  AwaitingPhoto,
  AwaitingKeyboardChoice(PendingEntry),
  AwaitingButtonDetails(PendingEntry),
}

/// Photo and caption collected so far, waiting for the button decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingEntry {
  pub photo_id: FileId,
  pub text: String,
}

impl PendingEntry {
  pub fn new(photo_id: FileId, text: impl Into<String>) -> Self {
    Self {
      photo_id,
      text: text.into(),
    }
  }
}

impl ConversationState {
  pub fn is_active(&self) -> bool {
    !matches!(self, Self::Idle)
  }
}

#[cfg(test)]
mod tests {
  use super::ConversationState;
  use super::PendingEntry;

  #[test]
  fn default_state_is_idle() {
    let state = ConversationState::default();
    assert_eq!(state, ConversationState::Idle);
    assert!(!state.is_active());
  }

  #[test]
  fn pending_states_are_active() {
    let pending = PendingEntry::new("file".to_string().into(), "Hello");
    assert!(ConversationState::AwaitingPhoto.is_active());
    assert!(ConversationState::AwaitingKeyboardChoice(pending.clone()).is_active());
    assert!(ConversationState::AwaitingButtonDetails(pending).is_active());
  }
}
