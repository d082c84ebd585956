//! # storesync testkit
//!
//! Test utilities for storesync.
//!
//! This crate provides:
//! - A scripted mock remote source with a connection toggle and gated calls
//! - A recording subscriber and event-drain helpers
//! - Property-based test generators using proptest
//! - A sample cart domain manager built on the coordinator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn add_item_commits() {
//!     let remote = MockRemote::new();
//!     remote.push_ok(Cart::default());
//!     let cart = CartManager::new(test_coordinator("cart"), remote);
//!     cart.initialize().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cart;
pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cart::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use cart::*;
pub use fixtures::*;
pub use generators::*;
pub use remote::*;
