//! SVMKit - dependency-ordered provisioning of Solana validator clusters
//!
//! A cluster is declared as a graph of resources (key pairs, a genesis
//! ledger, validator services). The engine resolves references between them,
//! applies independent resources concurrently, and drives every remote change
//! through idempotent shell scripts over SSH.
//!
//! # Modules
//!
//! - [`keypair`] - ed25519 key generation and the Solana keypair file format
//! - [`ssh`] - Remote execution transport, sessions and scripts
//! - [`graph`] - Resource graph, persisted state and the evaluator
//! - [`resource`] - Lifecycle trait, type registry and the key pair resource
//! - [`genesis`] - Genesis ledger construction
//! - [`validator`] - Agave validator service
//! - [`stack`] - YAML stack documents and `${...}` references
//! - [`flags`] - Command-line flag rendering
//! - [`template`] - Embedded script templates
//! - [`retry`] - Exponential backoff
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod error;
pub mod flags;
pub mod genesis;
pub mod graph;
pub mod keypair;
pub mod resource;
pub mod retry;
pub mod ssh;
pub mod stack;
pub mod template;
pub mod validator;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
