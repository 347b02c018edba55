//! Core types for Pomelo.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod price;
pub mod product;
pub mod profile;

pub use id::*;
pub use price::{CurrencyCode, Price};
pub use product::ProductSummary;
pub use profile::UserProfile;
