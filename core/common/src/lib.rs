//! Common utilities and types shared across labjournal crates.
//!
//! This module provides the error taxonomy every store operation reports
//! through, and the identifier and path types used to address records and
//! the files that belong to them.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{RecordId, RelativePath};
