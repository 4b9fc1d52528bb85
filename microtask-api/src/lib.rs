//! microtask-api: HTTP task source for the Microtask service

pub mod client;
pub mod error;
pub mod wire;

pub use client::{DEFAULT_BASE_URL, HttpTaskSource, LoginSession};
pub use error::ApiError;
