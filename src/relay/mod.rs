//! Consumers at the end of the pipeline.

pub mod attachments;
pub mod rooms;

pub use attachments::AttachmentRelay;
pub use rooms::{ControlRoomWriter, RoomLimits, RoomWriter};
