//! End-to-end tests for stack evaluation
//!
//! These tests drive real stacks through the evaluator and the built-in
//! resources. Remote hosts are replaced by a recording transport, so every
//! script the engine would send over SSH is captured and can be asserted on.
//!
//! ```bash
//! cargo test --test cluster
//! ```

mod cluster_tests;
