//! CLI command implementations.

pub mod common;
pub mod compress;
pub mod unpack;
