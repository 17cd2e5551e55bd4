//! HTTP API Handlers and Routes
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions and router configuration
//!
//! # API Endpoints
//!
//! - `GET /` - Static front page
//! - `POST /eval` - Form fields `candidate`, `job`; streamed plain-text reply
//! - `GET /answer?query=...` - Streamed answer grounded in the indexed documents
//! - `GET /assistant?input=...` - Chinook assistant; prose or a PNG data URL
//!
//! # Errors
//!
//! Any failure is logged with its classification and answered with HTTP 500
//! and the body `I'm sorry, but something went wrong.`. A missing or empty
//! `query`/`input` is not an error: the reply is an empty 200 body.

/// Request handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

pub use routes::create_router;
