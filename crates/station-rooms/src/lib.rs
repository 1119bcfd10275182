//! # Station Rooms
//! Lease-based room locks and the rooms registry.
//!
//! - `lease`: where lock markers live (memory or marker files)
//! - `lock`: `RoomLock`, a non-blocking TTL lease over a `LeaseStore`
//! - `handlers`: per-kind room work
//! - `registry`: room id → Room with lease-guarded runs

pub mod handlers;
pub mod lease;
pub mod lock;
pub mod registry;

pub use handlers::{HandlerTable, RoomHandler};
pub use lease::{FileLeaseStore, LeaseStore, MemoryLeaseStore, create_lease_store};
pub use lock::{LockTable, RoomLock};
pub use registry::RoomsRegistry;
