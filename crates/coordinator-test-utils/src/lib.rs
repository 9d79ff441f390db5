//! # Coordinator Test Utilities
//!
//! Shared test utilities for the coordinator service.
//!
//! This crate provides:
//! - Server test harness (`TestCoordinatorServer` for E2E tests)
//! - Realtime stream reader (`SseReader`) that decodes channel envelopes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use coordinator_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestCoordinatorServer::spawn().await?;
//!     let client = reqwest::Client::new();
//!
//!     let response = client
//!         .get(format!("{}/health", server.url()))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod sse;

// Re-export commonly used items
pub use server_harness::*;
pub use sse::*;
