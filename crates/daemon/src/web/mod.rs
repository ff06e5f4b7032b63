//! HTTP control surface.
//!
//! A JSON API over the session registry, served with axum:
//!
//! - [`server`]: router, listener and graceful shutdown
//! - [`handlers`]: one handler per endpoint
//! - [`error`]: mapping of registry errors to status codes

pub mod error;
pub mod handlers;
pub mod server;

pub use error::WebError;
pub use handlers::AppState;
pub use server::{bind, build_router, serve};
