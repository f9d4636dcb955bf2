//! Middleware modules for the AI Router Service
//!
//! Authentication and rate limiting for the HTTP surface.

pub mod auth;
pub mod rate_limit;

// Re-export commonly used types
pub use auth::{AuthContext, AuthMethod, AuthMiddleware};
pub use rate_limit::rate_limit_middleware;
