//! # Station Scheduler
//!
//! Queued task execution and the Dynamo maintenance loop.
//!
//! ## Design Principles
//! - Memory-resident state, shared by `Arc`, no globals
//! - Tokio timers only, zero overhead between ticks
//! - Every run holds its room's lease; nothing blocks waiting for one
//!
//! ## Architecture
//! ```text
//! DynamoEngine (tokio interval, watch-channel shutdown)
//!   ├── plan: ["room_guard", "room_health"] (round-robin)
//!   └── tick → RoomsRegistry::run(room)
//!
//! TaskStore (FIFO queue + task map)
//!   ├── submit → mode stamped from CredentialSource
//!   └── run_next → room lease → Executor
//!                                 ├── online  (remote call)
//!                                 └── offline (ping / room_check / summarize / stub)
//! ```

pub mod engine;
pub mod executor;
pub mod store;

pub use engine::{DynamoEngine, DynamoEvent, DynamoState};
pub use executor::{Execution, Executor, OfflineExecutor};
pub use store::{TaskStore, TaskStoreStatus};
