//! Resource-server calls made with the stored token

pub mod client;
mod me;
pub mod relay;

pub use client::GraphClient;
pub use me::whoami;
pub use relay::{RelayError, RelayRequest};
