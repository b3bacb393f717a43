use once_cell::sync::Lazy;
use regex::Regex;
use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Splits once on the first `" - "`; everything after it is the target.
static BUTTON_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?) - (.*)$").expect("valid regex"));

pub const BUTTON_FORMAT_HINT: &str = "Button Text - https://example.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ButtonError {
  #[error("button line must look like `Button Text - https://example.com`")]
  MissingSeparator,
  #[error("button label is empty")]
  EmptyLabel,
  #[error("button target must start with http")]
  NotAUrl,
  #[error("button target is not a valid url: {0}")]
  InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
  pub label: String,
  pub url: String,
}

impl LinkButton {
  pub fn parse(line: &str) -> Result<Self, ButtonError> {
    let captures = BUTTON_LINE.captures(line).ok_or(ButtonError::MissingSeparator)?;
    let label = captures.get(1).map_or("", |m| m.as_str()).trim();
    let url = captures.get(2).map_or("", |m| m.as_str()).trim();
    if label.is_empty() {
      return Err(ButtonError::EmptyLabel);
    }
    if !url.starts_with("http") {
      return Err(ButtonError::NotAUrl);
    }
    Ok(Self {
      label: label.to_string(),
      url: url.to_string(),
    })
  }

  pub fn to_inline(&self) -> Result<InlineKeyboardButton, ButtonError> {
    let url = Url::parse(&self.url).map_err(|err| ButtonError::InvalidUrl(err.to_string()))?;
    Ok(InlineKeyboardButton::url(self.label.clone(), url))
  }
}

/// Returns the trimmed lines of `input` that describe a valid link button.
/// Everything else is dropped without error.
pub fn parse_button_lines(input: &str) -> Vec<String> {
  input
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .filter(|line| LinkButton::parse(line).is_ok())
    .map(str::to_string)
    .collect()
}

/// Inline keyboard rebuilt from stored button lines.
#[derive(Debug, Clone)]
pub struct LinkKeyboard {
  pub markup: Option<InlineKeyboardMarkup>,
  /// Number of lines that made it into `markup`.
  pub rendered: usize,
}

/// One link button per row. Lines that no longer parse are logged and skipped;
/// `markup` is `None` when nothing renderable is left.
pub fn link_keyboard(lines: &[String]) -> LinkKeyboard {
  let rows: Vec<Vec<InlineKeyboardButton>> = lines
    .iter()
    .filter_map(|line| match LinkButton::parse(line).and_then(|button| button.to_inline()) {
      Ok(button) => Some(vec![button]),
      Err(err) => {
        warn!(line = %line, error = %err, "skipping malformed stored button");
        None
      },
    })
    .collect();

  let rendered = rows.len();
  let markup = if rows.is_empty() {
    None
  } else {
    Some(InlineKeyboardMarkup::new(rows))
  };
  LinkKeyboard { markup, rendered }
}

#[cfg(test)]
mod tests {
  use teloxide::types::InlineKeyboardButtonKind;

  use super::ButtonError;
  use super::LinkButton;
  use super::link_keyboard;
  use super::parse_button_lines;

  #[test]
  fn parses_label_and_url() {
    let button = LinkButton::parse("  Docs -  https://example.com ").unwrap();
    assert_eq!(button.label, "Docs");
    assert_eq!(button.url, "https://example.com");
  }

  #[test]
  fn splits_on_first_separator_only() {
    assert_eq!(
      LinkButton::parse("A - B - https://example.com"),
      Err(ButtonError::NotAUrl)
    );
    let button = LinkButton::parse("Read - http://example.com/a - b").unwrap();
    assert_eq!(button.url, "http://example.com/a - b");
  }

  #[test]
  fn rejects_malformed_lines() {
    assert_eq!(LinkButton::parse("Bad line"), Err(ButtonError::MissingSeparator));
    assert_eq!(LinkButton::parse("Docs-https://x.io"), Err(ButtonError::MissingSeparator));
    assert_eq!(LinkButton::parse("Docs - ftp://x.io"), Err(ButtonError::NotAUrl));
    assert_eq!(LinkButton::parse("   - https://x.io"), Err(ButtonError::EmptyLabel));
  }

  #[test]
  fn keeps_only_valid_lines() {
    let lines = parse_button_lines("Docs - https://example.com\nBad line\n\n  Shop - http://shop.example  \n");
    assert_eq!(lines, vec!["Docs - https://example.com", "Shop - http://shop.example"]);
  }

  #[test]
  fn no_valid_lines_yields_empty() {
    assert!(parse_button_lines("nothing here\nstill - nothing").is_empty());
    assert!(parse_button_lines("").is_empty());
  }

  #[test]
  fn builds_one_row_per_button() {
    let lines = vec![
      "Docs - https://example.com".to_string(),
      "Shop - https://shop.example.com".to_string(),
    ];
    let keyboard = link_keyboard(&lines);
    assert_eq!(keyboard.rendered, 2);
    let keyboard = keyboard.markup.unwrap();
    assert_eq!(keyboard.inline_keyboard.len(), 2);
    let first = &keyboard.inline_keyboard[0][0];
    assert_eq!(first.text, "Docs");
    assert!(matches!(&first.kind, InlineKeyboardButtonKind::Url(url) if url.host_str() == Some("example.com")));
  }

  #[test]
  fn skips_malformed_stored_buttons() {
    let lines = vec!["broken".to_string(), "Docs - https://example.com".to_string()];
    let keyboard = link_keyboard(&lines);
    assert_eq!(keyboard.rendered, 1);
    assert_eq!(keyboard.markup.unwrap().inline_keyboard.len(), 1);

    let empty = link_keyboard(&[]);
    assert_eq!(empty.rendered, 0);
    assert!(empty.markup.is_none());
  }

  #[test]
  fn accepted_line_with_unparsable_url_does_not_render() {
    // Starts with http, so authoring accepts it, but Telegram needs a real url.
    let lines = parse_button_lines("Docs - httpfoo\nShop - http://");
    assert_eq!(lines.len(), 2);
    let keyboard = link_keyboard(&lines);
    assert_eq!(keyboard.rendered, 0);
    assert!(keyboard.markup.is_none());
  }
}
