//! # tierdb Core
//!
//! Core types shared by the tierdb crates: versioned keys, records,
//! the error taxonomy and on-disk format constants.

#![warn(clippy::all)]

pub mod error;
pub mod format_version;
pub mod record;

pub use error::{Error, Result};
pub use record::{Key, Record, Value};
