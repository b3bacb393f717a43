use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
  /// Create a new auto-response (admin only)
  Start,
  /// Abort the current operation
  Cancel,
  /// Show the help text
  Help,
}
