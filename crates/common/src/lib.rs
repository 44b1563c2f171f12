//! Common utilities and types shared across webwatch crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
