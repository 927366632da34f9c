//! Infrastructure layer
//!
//! Implementations backed by external systems such as the OS keyring.

pub mod security;
