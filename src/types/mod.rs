//! Shared types for natter-gate

pub mod error;

pub use error::{GateError, Result};
