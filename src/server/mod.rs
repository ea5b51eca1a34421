//! HTTP adapter wiring the gates into routes

pub mod http;

pub use http::{handle, run, AppState};
