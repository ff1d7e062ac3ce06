//! DumbGPT chat relay.
//!
//! Accepts chat messages over HTTP, keeps a short per-session window of the
//! conversation, and forwards it to a completion API behind content
//! filtering, rate limits and a daily quota.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{build_router, AppState, Application};
