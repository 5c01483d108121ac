//! Key-value storage contract for Homemendi services.
//!
//! This crate provides the [`StorageBackend`] trait consumed by the
//! authorization core in `homemendi-authn`. Records are addressed by a single
//! ordered byte key; callers compose partition and sort keys into it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Request handlers (projects, criteria, houses)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │          homemendi-authn (AccessAuthorizer, AuthGate)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                homemendi-storage                            │
//! │        StorageBackend trait (get, set, delete, get_range)   │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│     managed key-value store adapter          │
//! │   (testing)  │          (production)                        │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use homemendi_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"member/alice/project-1".to_vec(), b"{}".to_vec()).await?;
//!
//!     let value = backend.get(b"member/alice/project-1").await?;
//!     assert!(value.is_some());
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod types;

pub use backend::StorageBackend;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use types::{KeyValue, prefix_end};
