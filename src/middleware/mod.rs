//! HTTP middleware for rate limiting and admin authentication.
//!
//! # Architecture
//!
//! ```text
//! /v1/*     Request → Rate Limiter (per workspace) → Handler
//!                         ↓
//!                  400 / 429 / 503
//!
//! /admin/*  Request → Admin Key Auth → Handler
//!                         ↓
//!                    401 Unauthorized
//! ```
//!
//! Request ids and tracing spans are applied to every route by `tower-http`
//! layers in [`crate::routes`].

pub mod auth;
pub mod rate_limit;

pub use auth::{ADMIN_KEY_HEADER, AdminKeyAuth};
pub use rate_limit::RateLimitLayer;
