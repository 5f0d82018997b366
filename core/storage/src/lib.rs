//! Durable document storage for labjournal.
//!
//! This module provides a trait-based interface over the place documents
//! are kept, with an atomic local-filesystem implementation and an
//! in-memory one for tests.
//!
//! # Design Principles
//! - Readers never observe a partially written document
//! - Missing parent directories are created on write
//! - Failures are reported, never retried internally

pub mod local;
pub mod memory;
pub mod provider;

pub use local::AtomicFileStore;
pub use memory::MemoryStorage;
pub use provider::{DocumentStorage, Metadata};
