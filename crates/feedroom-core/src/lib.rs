//! Shared building blocks for feedroom
//!
//! This crate holds the parts of the relay that need no network: the status
//! and notification model, the bounded recency cache used for deduplication
//! and upload memoization, chat command parsing, and message formatting.

pub mod bounded_cache;
pub mod commands;
pub mod format;
pub mod status;

// Re-export commonly used types
pub use bounded_cache::{BoundedCache, CacheError, Sequence};
pub use commands::{
    check_character_limit, direct_recipients, has_direct_recipient, parse_status_argument,
    ArgumentError, TooLong,
};
pub use format::{format_account, format_notification, format_status, status_text, RenderedMessage};
pub use status::{
    Account, AccountId, Attachment, AttachmentKind, Notification, NotificationKind, Relationship,
    Status, StatusId, Tag, TaggedEvent, Visibility,
};
