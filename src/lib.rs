// src/lib.rs
// Engram - dual-backend memory consistency engine

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod db;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extract;
pub mod graph;
pub mod identity;
pub mod mcp;
pub mod scope;
pub mod vector;

pub use error::{EngramError, Result};
pub use scope::FilterSpec;
