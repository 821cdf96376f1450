//! Tunebridge-Common: Shared types and errors.
//!
//! This crate provides the vocabulary used across tunebridge:
//!
//! - **Track Types**: Search hits, playable URLs, match results, metadata and lyrics
//! - **Status Types**: Provider statistics and derived source health
//! - **Error Handling**: The typed error taxonomy surfaced to callers
//!
//! # Examples
//!
//! ```
//! use tunebridge_common::{Error, Result, SearchResult};
//!
//! let hit = SearchResult::new("42", "Song", "Artist", "Album", "gdstudio");
//! assert_eq!(hit.dedup_key(), ("Song", "Artist", "Album"));
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("track 42"))
//! }
//! assert!(example().is_err());
//! ```

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
