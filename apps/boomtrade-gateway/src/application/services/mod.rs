//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `BackoffPolicy`: Shared exponential backoff for restarts and retries
//! - `SessionHandle`: Single writer for the gateway session
//! - `Facade`: State-gated REST operations

pub mod backoff;
pub mod error;
pub mod facade;
pub mod session;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use error::FacadeError;
pub use facade::{Facade, FacadeSettings, GatewayStatus};
pub use session::SessionHandle;
