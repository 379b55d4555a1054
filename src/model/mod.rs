//! Data types, split by where they live:
//!
//! - `common`: identifiers and small value types used everywhere.
//! - `db`: records as they are stored.
//! - `api`: request and response bodies.
//! - `mongodb`: MongoDB collection plumbing.

pub mod api;
pub mod common;
pub mod db;
pub mod mongodb;
