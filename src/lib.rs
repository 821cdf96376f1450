//! Tunebridge - music source resolution core
//!
//! Resolves track ids and keywords against a set of unreliable upstream
//! providers. The library crate exposes the building blocks for embedding and
//! integration testing.

pub mod cache;
pub mod config;
pub mod context;
pub mod manager;
pub mod provider;
pub mod ratelimit;
pub mod resolver;
pub mod sweeper;
pub mod transport;

pub use context::RequestContext;
pub use manager::SourceManager;
pub use tunebridge_common::{Error, Result};
