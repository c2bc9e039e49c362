//! The status forwarding graph.
//!
//! Every stage runs as its own task and talks to its neighbours only through
//! bounded channels. A stage closes its outputs by dropping its senders, so
//! the end of an input stream propagates downstream on its own.
//!
//! ```text
//! home stream --> splitter --> control filter --> control suppressor --> controlling room
//!                    |              \ (mirror)
//!                    |               v
//! tag stream --> splitter ------> block filter N --> room suppressor --> room writer
//!                    |              \ (mirror)
//!                    |               v
//!                    |            block filter N-1 --> ...
//!                    v
//!              notifications --> controlling room
//! ```

pub mod assembler;
pub mod dedup;
pub mod filter;
pub mod splitter;

use feedroom_core::Status;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Buffer size of every inter-stage channel.
pub const CHANNEL_CAPACITY: usize = 42;

pub type StatusSender = mpsc::Sender<Arc<Status>>;
pub type StatusReceiver = mpsc::Receiver<Arc<Status>>;

pub fn status_channel() -> (StatusSender, StatusReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}

pub use assembler::{assemble, Destination, FeedGraph, FeedSources, PipelinePlan};
pub use filter::FilterConfig;
