//! Resumable upload and replication gateway.
//!
//! Accepts large objects through a tus-style chunked upload protocol and
//! places them into pluggable S3-compatible backends, and replicates stored
//! objects between backends with parallel range-partitioned copies.

pub mod backend;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
