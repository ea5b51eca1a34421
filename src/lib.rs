//! natter-gate - token stores and authorization gates for the Natter API
//!
//! Clients authenticate with HTTP Basic credentials, exchange them for a
//! token, and present that token on later requests. A gate pipeline turns
//! the presented credential into an authenticated subject and then enforces
//! scope and per-resource permission rules.
//!
//! ## Architecture
//!
//! ```text
//! request ─▶ RequestContext ─▶ Pipeline [ basic │ token │ scope │ permission ] ─▶ handler
//!                                              │
//!                                              ▼
//!                                        TokenStore stack
//!                  session │ database │ hmac(…) │ encrypted(…) │ jwt │ jwe │ access-token
//! ```
//!
//! Token stores compose as decorators: `hmac(encrypted(database))` tags the
//! sealed identifier of a hashed database row.

pub mod auth;
pub mod codec;
pub mod config;
pub mod context;
pub mod db;
pub mod server;
pub mod token;
pub mod types;

pub use config::{Args, KeyMaterial};
pub use context::{Rejection, RequestContext};
pub use server::{run, AppState};
pub use token::{Token, TokenLookup, TokenStore};
pub use types::{GateError, Result};
