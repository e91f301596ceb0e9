//! # Skiff Testkit
//!
//! Test utilities for the Skiff sync engine.
//!
//! This crate provides:
//! - Outbox entry fixtures and a fully wired [`TestEngine`]
//! - Property-based test generators using proptest
//! - Scripted download strategies and recording host collaborators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skiff_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn uploads_everything() {
//!     let t = TestEngine::builder().build();
//!     t.seed(&data_entries(3, base_time())).await;
//!     assert!(t.engine.start_sync().await.is_completed());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scripted;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scripted::*;
}

pub use fixtures::*;
pub use generators::*;
pub use scripted::*;
