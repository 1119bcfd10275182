//! Seams injected into the registry, task store, and scheduler.

pub mod clock;
pub mod credentials;
pub mod executor;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use executor::TaskExecutor;
