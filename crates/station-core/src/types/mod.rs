//! Shared entity types.

pub mod room;
pub mod task;

pub use room::{Room, RoomKind, RoomRun, RunStatus};
pub use task::{Task, TaskMode, TaskStatus};
