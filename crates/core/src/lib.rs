//! Pomelo Core - Shared types library.
//!
//! This crate provides common types used across all Pomelo components:
//! - `client` - Session and cart-reconciliation library for the UI shell
//! - `integration-tests` - End-to-end tests against a mock commerce API
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, prices, and the user
//!   profile shape cached by the session layer

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
