//! Shared foundational types used across the tessera dataset cache engine.
//!
//! This crate provides the content digest used for content addressing and the
//! internal error type used for invariant violations.

#![warn(missing_docs)]

pub mod hash;
pub mod result;

pub use hash::{ContentHash, ContentHasher, ParseContentHashError};
pub use result::InternalError;
