//! Integration tests for svmkit stacks
//!
//! Tests are organized by the story they tell:
//!
//! - `provisioning`: Stories about bringing a fresh cluster up, in dependency
//!   order, from key generation through a running bootstrap validator
//!
//! - `rerun`: Stories about evaluating an already-applied stack again, with
//!   and without changes
//!
//! - `failures`: Stories about what happens when a host rejects a script or
//!   the stack itself is malformed

mod failures;
mod helpers;
mod provisioning;
mod rerun;
