//! feedroom relays a Mastodon account into Matrix rooms and lets the
//! controlling room post, reblog and favourite through chat commands.
//!
//! Statuses flow through [`pipeline`], a graph of filter and duplicate
//! suppression stages, into the room writers of [`relay`]. Chat commands of
//! the controlling room are handled by [`bot`].

pub mod bot;
pub mod config;
pub mod mastodon;
pub mod matrix;
pub mod pipeline;
pub mod relay;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::Config;
