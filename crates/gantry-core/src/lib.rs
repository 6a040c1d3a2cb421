//! Gantry Core
//!
//! Core domain types, traits, and error handling for Gantry.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod context;
pub mod error;
pub mod ids;
pub mod instance;
pub mod job;

pub use error::{Error, Result};
pub use ids::*;
