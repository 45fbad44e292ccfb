#![allow(dead_code)]

//! Common test infrastructure
//!
//! This module provides everything the end-to-end tests need to run jobs
//! through the real pipeline and scheduler over fake collaborators.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{fake_audio, TestHarness, TRACK_1_FILE, TRACK_1_ID};
//!
//! #[tokio::test]
//! async fn test_completes() {
//!     let harness = TestHarness::new();
//!     let job = harness.upload(TRACK_1_ID, TRACK_1_FILE, fake_audio(30.0)).await;
//!     harness.run(&job).await;
//! }
//! ```

mod constants;
mod fixtures;
mod harness;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{corrupt_audio, fake_audio, FakeCodec, FlakyJobStore, FlakyObjectStore};
#[allow(unused_imports)]
pub use harness::{fast_retry, TestHarness, TestHarnessBuilder};
