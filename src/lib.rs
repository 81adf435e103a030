// Library module for framesync
// Keeps dataset working trees in sync with a versioned remote through a
// shared content-addressed cache

pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod hash;
pub mod transfer;
pub mod vcs;

pub use error::{Error, Result};
