//! # doctai-error
//!
//! Unified error handling for doctai, following OpenDAL's error handling practices.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what went wrong (e.g., NoSources, ProviderAuth)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with key-value context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use doctai_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::WorkDirFailed, "cannot create working directory")
//!         .with_operation("workdir::create")
//!         .with_context("path", "/tmp/doctai_x")
//!         .with_context("source_id", "README.md"))
//! }
//! ```
//!
//! ## Principles
//!
//! - Fallible setup functions return `Result<T, doctai_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent layers only append context
//! - Script failures are data, never an `Error`

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using doctai Error
pub type Result<T> = std::result::Result<T, Error>;
