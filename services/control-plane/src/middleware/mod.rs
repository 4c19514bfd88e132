pub mod admin;
pub mod auth;
pub mod rate_limit;

pub use admin::{admin_middleware, AdminContext};
pub use auth::{auth_middleware, AuthContext};
pub use rate_limit::{bot_rate_limit_middleware, rate_limit_middleware, RateLimiter};
