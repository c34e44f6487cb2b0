//! Integration tests for the Conduit operator
//!
//! These tests need a live cluster and tell the story of how platform
//! operators interact with the Conduit resources through the API server.
//!
//! - `crd_operations`: creating, reading, updating and deleting pipelines
//!   and the Telemetry module
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
