//! End-to-end integration tests for the Conduit operator
//!
//! These tests require a Kubernetes cluster with the Conduit CRDs installed.
//! They are ignored by default and can be run with:
//!
//! ```bash
//! cargo run -- --crd | kubectl apply -f -
//! cargo test --test kind -- --ignored
//! ```

mod kind_tests;
