//! Nimbus HTTP API service.
//!
//! This crate wires the nimbus backend together behind one authenticated
//! HTTP API:
//!
//! - A persistent job scheduler (`/jobs`) backed by PostgreSQL
//! - A streaming chat proxy (`/chat`) with conversation persistence
//! - Conversation CRUD (`/chat/conversations`)
//!
//! # Authentication
//!
//! Every non-public route requires either a Bearer JWT (Ed25519, verified
//! against the identity provider's JWKS) or an API key (verified against
//! the provider's verification endpoint). Both unify into a request-scoped
//! principal; the API-key identity wins when both are present.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers are async only for routing consistency

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
