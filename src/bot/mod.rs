//! The controlling-room bot: posting, reblogging and favouriting from chat.

pub mod action_memory;
pub mod commands;
pub mod images;
pub mod user_locks;

pub use action_memory::{ActionMemory, ACTION_MEMORY_CAPACITY};
pub use commands::{BotSettings, CommandHandler};
pub use images::ImageStore;
pub use user_locks::UserLocks;
