//! Client-side session and cart layer for the Pomelo storefront.
//!
//! The crate centers on three collaborators:
//!
//! - [`SessionStore`] owns the authentication token, its expiry, and the
//!   cached user profile, all persisted through a [`KeyValueStore`].
//! - [`CartReconciler`] owns the cart and routes every mutation to device
//!   storage (logged out) or the server cart (logged in), merging the two
//!   once per login.
//! - [`LoginCoordinator`] drives the login handshake and sequences the
//!   session commit and the cart merge.
//!
//! [`Storefront`] wires the three together, either over the production REST
//! API ([`Storefront::over_http`]) or over caller-supplied implementations
//! of the [`RemoteCartGateway`] and [`AuthBackend`] traits.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
mod client;
pub mod config;
pub mod gateway;
pub mod login;
pub mod session;
pub mod storage;

pub use cart::{
    CartLine, CartMode, CartReconciler, CartSummary, CartSyncError, CheckoutDraft,
};
pub use client::{HttpStorefront, SetupError, Storefront};
pub use config::{ClientConfig, ConfigError};
pub use gateway::{
    AuthBackend, AuthSuccess, Credentials, GatewayError, LineUpdate, RemoteCartGateway,
    RemoteCartLine,
};
pub use login::{LoginCoordinator, LoginError};
pub use session::{SessionStore, TokenProvider};
pub use storage::{
    BrowseEntry, BrowseHistory, JsonFileStore, KeyValueStore, MemoryStore, SearchHistory,
    StorageError,
};
