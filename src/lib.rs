//! pressroom: cached, rate-limited and queue-backed document builds.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod limiter;
pub mod util;
