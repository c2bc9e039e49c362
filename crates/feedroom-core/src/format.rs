//! Rendering of statuses and notifications as chat-room messages.

use crate::status::{Account, Notification, NotificationKind, Status};

/// A chat message in plain-text and HTML form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub body: String,
    pub html: String,
}

/// Returns `(display, handle)`.
///
/// `display` is the most human form available (display name, then
/// `@username`, then `@acct`); `handle` is the next less specific one.
pub fn format_account(account: &Account) -> (String, String) {
    let acct = format!("@{}", html_to_text(&account.acct));
    let username = html_to_text(&account.username);
    let display_name = html_to_text(&account.display_name);

    let mut display = acct;
    let mut handle = String::new();
    if !username.is_empty() {
        handle = display;
        display = format!("@{username}");
    }
    if !display_name.is_empty() {
        handle = display;
        display = display_name;
    }
    (display, handle)
}

/// Plain text of a status body, truncated to `char_limit` characters.
pub fn status_text(status: &Status, char_limit: usize) -> String {
    truncate_chars(&html_to_text(&status.content), char_limit)
}

pub fn format_status(status: &Status, char_limit: usize) -> RenderedMessage {
    let (sender, handle) = format_account(&status.account);
    let url = status.link();
    let text = status_text(status, char_limit);

    RenderedMessage {
        body: format!("{sender} ({handle}) [ {url} ]>\n{text}"),
        html: format!(
            "<u><strong>{}</strong> ({}) writes in <a href=\"{}\">{}</a>&gt;</u><br/>{}",
            escape_html(&sender),
            escape_html(&handle),
            escape_html(url),
            escape_html(url),
            text_to_html(&text),
        ),
    }
}

pub fn format_notification(notification: &Notification, char_limit: usize) -> RenderedMessage {
    let (sender, handle) = format_account(&notification.account);
    let (url, text, visibility) = match &notification.status {
        Some(status) => (
            status.link().to_string(),
            status_text(status, char_limit),
            status.visibility.as_str(),
        ),
        None => (String::new(), String::new(), ""),
    };

    let s = escape_html(&sender);
    let h = escape_html(&handle);
    let u = escape_html(&url);

    let (body, html) = match notification.kind {
        NotificationKind::Mention => (
            format!("{sender} ({handle}) mentioned you in {visibility} status [ {url} ]:\n{text}"),
            format!(
                "<u><strong>{s}</strong> ({h}) mentioned you in {visibility} status <a href=\"{u}\">{u}</a>&gt;</u><br/>{}",
                text_to_html(&text)
            ),
        ),
        NotificationKind::Reblog => (
            format!("{sender} ({handle}) reblogged your status [ {url} ]"),
            format!("<strong>{s}</strong> ({h}) reblogged your status <a href=\"{u}\">{u}</a>"),
        ),
        NotificationKind::Favourite => (
            format!("{sender} ({handle}) favourited your status [ {url} ]"),
            format!("<strong>{s}</strong> ({h}) favourited your status <a href=\"{u}\">{u}</a>"),
        ),
        NotificationKind::Follow => (
            format!("{sender} ({handle}) is following you now"),
            format!("<strong>{s}</strong> ({h}) is following you now"),
        ),
        NotificationKind::FollowRequest => (
            format!("{sender} ({handle}) would like to follow you!"),
            format!("<strong>{s}</strong> ({h}) would like to follow you!"),
        ),
        NotificationKind::Poll => (
            format!("the result of {sender}'s poll is in: {url}"),
            format!("the result of <strong>{s}</strong>'s poll is in: <a href=\"{u}\">{u}</a>"),
        ),
        NotificationKind::Other => (
            format!("received unsupported notification from {sender} ({handle})"),
            format!("received unsupported notification from {s} ({h})"),
        ),
    };

    RenderedMessage { body, html }
}

fn html_to_text(html: &str) -> String {
    nanohtml2text::html2text(html).trim().to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn text_to_html(text: &str) -> String {
    escape_html(text).replace('\n', "<br/>")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
