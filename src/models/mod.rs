//! Data models for the query runner.
//!
//! This module re-exports all model types used throughout the crate.

pub mod param;
pub mod value;

// Re-export commonly used types
pub use param::{OutParameter, Param};
pub use value::{FromValue, SqlType, Value, ValueKind};
