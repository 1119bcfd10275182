//! # Station Core
//! Shared types, injectable seams, errors, and configuration for the Station
//! workspace. Nothing here holds process-global state.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{BusyPolicy, LockBackend, StationConfig};
pub use error::{Result, StationError};
pub use traits::{Clock, CredentialSource, SystemClock, TaskExecutor};
pub use types::{Room, RoomKind, RoomRun, RunStatus, Task, TaskMode, TaskStatus};
