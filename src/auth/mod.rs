//! Authentication and authorization gates
//!
//! A typical protected route runs:
//!
//! ```text
//! BasicAuthenticator -> TokenValidator -> RequireAuthentication -> RequireScope -> RequirePermission
//! ```

pub mod basic;
pub mod controller;
pub mod gates;
pub mod password;
pub mod pipeline;
pub mod validator;

pub use basic::{parse_basic_credentials, BasicAuthenticator};
pub use controller::{IssuedToken, TokenController};
pub use gates::{require_authentication, RequireAuthentication, RequirePermission, RequireScope};
pub use password::{hash_password, is_valid_username, register_user, verify_password};
pub use pipeline::{Gate, Pipeline};
pub use validator::{extract_bearer, TokenTransport, TokenValidator, EXPIRED_CHALLENGE};
