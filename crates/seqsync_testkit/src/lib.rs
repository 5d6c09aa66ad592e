//! # SeqSync Testkit
//!
//! Test utilities for SeqSync.
//!
//! This crate provides:
//! - `LoopbackLink`: an in-process connection between an outbox and a client
//! - `LoopbackSession`: a running outbox, link and client wired together
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seqsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn resumes_after_disconnect() {
//!     let session = LoopbackSession::start_default("page-1");
//!     session.connect().await.unwrap();
//!     session.outbox.enqueue_message("notify", serde_json::json!({}));
//!     session.settle().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod loopback;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::loopback::*;
}

pub use fixtures::*;
pub use generators::*;
pub use loopback::*;
