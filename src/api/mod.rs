//! Catalog REST API: transport, endpoint table, error taxonomy and the session
//! collaborator.

mod auth;
mod client;
mod endpoints;
mod error;

pub use auth::{AuthProvider, SessionToken, TokenFile};
pub use client::{ApiClient, ApiSetupError};
pub use endpoints::{Command, Endpoint};
pub use error::{ApiError, GENERIC_ERROR_MESSAGE};
