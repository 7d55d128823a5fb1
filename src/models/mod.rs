//! Data models for Graph entities

mod user;

pub use user::*;
