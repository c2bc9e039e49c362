//! Parsing helpers for chat-room commands (reblog, favourite, direct posts).

use crate::status::StatusId;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// `https://host/@user/<id>` or `https://host/web/statuses/<id>`.
static STATUS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/\s]+/(?:@\w+|web/statuses)/(\d+)$").expect("valid status url regex")
});

/// `@user` or `@user@host`, at the start or after whitespace.
static DIRECT_RECIPIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(@\w+(?:@[a-zA-Z0-9.]+)?)(?:\W|$)").expect("valid recipient regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("Sorry, 'last' not implemented yet")]
    LastNotImplemented,
    #[error("Please say {prefix} followed by 'last', <status URL> or 'toot' <ID>")]
    Usage { prefix: String },
}

/// Parse the text following a reblog/favourite prefix into a status ID.
///
/// Accepts `toot <id>`, `status <id>` or a single status URL.
pub fn parse_status_argument(prefix: &str, args: &str) -> Result<StatusId, ArgumentError> {
    let args = args.trim().to_lowercase();
    let words: Vec<&str> = args.splitn(3, ' ').filter(|w| !w.is_empty()).collect();

    let usage = || ArgumentError::Usage {
        prefix: prefix.to_string(),
    };

    match words.as_slice() {
        [keyword, id, ..] if matches!(*keyword, "toot" | "status") => Ok(StatusId::from(*id)),
        ["last"] => Err(ArgumentError::LastNotImplemented),
        [url] => STATUS_URL_RE
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| StatusId::from(m.as_str()))
            .ok_or_else(usage),
        _ => Err(usage()),
    }
}

/// Whether `text` addresses at least one `@recipient`.
pub fn has_direct_recipient(text: &str) -> bool {
    DIRECT_RECIPIENT_RE.is_match(text)
}

/// All `@recipient` handles in `text`, in order.
pub fn direct_recipients(text: &str) -> Vec<&str> {
    DIRECT_RECIPIENT_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("text has {length} characters, the limit is {limit}")]
pub struct TooLong {
    pub length: usize,
    pub limit: usize,
}

pub fn check_character_limit(text: &str, limit: usize) -> Result<(), TooLong> {
    let length = text.chars().count();
    if length > limit {
        return Err(TooLong { length, limit });
    }
    Ok(())
}
