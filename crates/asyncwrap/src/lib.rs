//! Higher-order wrappers around async functions.
//!
//! These wrappers are independent of each other and can be freely combined:
//!
//! - [`Memoizer`] caches successful results of an async function, deduplicates concurrent
//!   requests for the same key and optionally expires entries after a TTL.
//! - [`settle_all`] awaits a collection of fallible futures concurrently, without failing fast,
//!   and splits their outcomes into [`Settled`] results and errors.
//! - [`transform_errors`] maps the error of an async function through a handler.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

pub mod config;
pub mod logging;
pub mod utils;

mod errors;
mod memoize;
mod settle;

pub use errors::*;
pub use memoize::*;
pub use settle::*;

#[cfg(any(test, feature = "test"))]
pub(crate) use tokio::time;

#[cfg(not(any(test, feature = "test")))]
pub(crate) use std::time;
