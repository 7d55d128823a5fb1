//! Authentication against the Microsoft identity platform
//!
//! Authorization Code flow with a confidential client. Holds one user token
//! at a time and manages it through refresh, revoke and liveness tests.

pub mod claims;
pub mod error;
pub mod lifecycle;
pub mod provider;
pub mod scopes;
pub mod tokens;
pub mod usage;

pub use error::LifecycleError;
pub use lifecycle::TokenLifecycle;
pub use tokens::{MemoryTokenStore, Token};
pub use usage::MemoryUsageLog;
