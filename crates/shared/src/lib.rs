//! Seatkeeper Shared Types and Utilities
//!
//! This crate contains identifiers, tenancy value types, errors, and database
//! helpers shared across the Seatkeeper workspace.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
