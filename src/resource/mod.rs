//! Resource lifecycle contract and type registry
//!
//! Every managed object (key pair, genesis ledger, validator service)
//! implements [`Resource`]. The graph engine only ever sees resolved inputs
//! and outputs as JSON values; each implementation deserializes its own typed
//! arguments from them, which keeps the engine independent of resource kinds.

mod keypair;

pub use keypair::KeyPairResource;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::genesis::GenesisResource;
use crate::retry::RetryConfig;
use crate::ssh::{Connection, PooledSession, SessionPool, Transport};
use crate::template::TemplateEngine;
use crate::validator::AgaveResource;
use crate::{Error, Result};

/// Type token for generated key pairs
pub const KEY_PAIR_TYPE: &str = "svm:KeyPair";
/// Type token for the Solana genesis ledger
pub const GENESIS_TYPE: &str = "svm:genesis:Solana";
/// Type token for an Agave validator service
pub const VALIDATOR_TYPE: &str = "svm:validator:Agave";

/// Both package names resolve to one provider
const NAMESPACE: &str = "svm:";
const NAMESPACE_ALIAS: &str = "svmkit:";

/// Canonical form of a type token (`svmkit:` is folded into `svm:`)
pub fn normalize_type_token(token: &str) -> String {
    match token.strip_prefix(NAMESPACE_ALIAS) {
        Some(rest) => format!("{NAMESPACE}{rest}"),
        None => token.to_string(),
    }
}

/// How a resource reacts to changed inputs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// Apply the change in place
    Update,
    /// Delete the old object and create a new one
    Replace,
}

/// What happens to a resource's remote files when it is deleted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionPolicy {
    /// Leave files in place
    #[default]
    Keep,
    /// Remove files on delete; refuse to create over existing files
    Delete,
    /// Remove files on delete and overwrite existing files on create
    DeleteAndForceCreation,
}

impl DeletionPolicy {
    /// Whether delete removes managed files
    pub fn removes_files(self) -> bool {
        !matches!(self, DeletionPolicy::Keep)
    }

    /// Whether create may overwrite existing files
    pub fn overwrites_existing(self) -> bool {
        matches!(self, DeletionPolicy::DeleteAndForceCreation)
    }
}

/// Lifecycle operations for one resource kind
///
/// Implementations must be idempotent: `create` and `update` may be re-run
/// against a host where the work is already done.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Resource: Send + Sync {
    /// Stable type token, e.g. `svm:genesis:Solana`
    fn type_token(&self) -> &'static str;

    /// Validate resolved inputs before any remote call
    ///
    /// Runs for every node on every evaluation, including no-op passes.
    fn check(&self, _ctx: &ApplyContext, _id: &str, _inputs: &Value) -> Result<()> {
        Ok(())
    }

    /// Classify a change between previously applied and new inputs
    fn diff(&self, id: &str, old_inputs: &Value, new_inputs: &Value) -> Result<DiffKind>;

    /// Create the object and return its outputs
    async fn create(&self, ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<Value>;

    /// Apply changed inputs to an existing object
    async fn update(
        &self,
        ctx: &ApplyContext,
        id: &str,
        old_outputs: &Value,
        inputs: &Value,
    ) -> Result<Value>;

    /// Tear the object down
    async fn delete(&self, ctx: &ApplyContext, id: &str, inputs: &Value, outputs: &Value) -> Result<()>;
}

/// Maps type tokens to lifecycle implementations
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, Arc<dyn Resource>>,
}

impl ResourceRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the key pair, genesis and validator resources
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(KeyPairResource));
        registry.register(Arc::new(GenesisResource));
        registry.register(Arc::new(AgaveResource));
        registry
    }

    /// Add or replace the implementation for a type token
    pub fn register(&mut self, resource: Arc<dyn Resource>) {
        self.resources
            .insert(normalize_type_token(resource.type_token()), resource);
    }

    /// Look up the implementation for a type token
    pub fn get(&self, type_token: &str) -> Result<Arc<dyn Resource>> {
        self.resources
            .get(&normalize_type_token(type_token))
            .cloned()
            .ok_or_else(|| Error::validation(format!("unknown resource type {type_token}")))
    }

    /// Whether a type token is known
    pub fn contains(&self, type_token: &str) -> bool {
        self.resources.contains_key(&normalize_type_token(type_token))
    }
}

/// State shared by every lifecycle call in one evaluation
///
/// Holds the session pool, the template engine, and the table of claimed
/// host-local names (ports, unit names) used to detect collisions between
/// resources targeting the same machine.
pub struct ApplyContext {
    sessions: SessionPool,
    templates: TemplateEngine,
    claims: DashMap<String, String>,
}

impl ApplyContext {
    /// Context over the given transport
    pub fn new(transport: Arc<dyn Transport>, retry: RetryConfig) -> Self {
        Self {
            sessions: SessionPool::new(transport, retry),
            templates: TemplateEngine::new(),
            claims: DashMap::new(),
        }
    }

    /// Shared session for a connection
    pub async fn session(&self, connection: &Connection) -> Result<Arc<PooledSession>> {
        self.sessions.acquire(connection).await
    }

    /// Template engine for rendering assets
    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// Claim a host-local name for `owner`
    ///
    /// Claiming a name twice for the same owner is allowed; a claim by a
    /// different owner is a validation error naming both.
    pub fn claim(&self, key: impl Into<String>, owner: &str) -> Result<()> {
        let key = key.into();
        let holder = self
            .claims
            .entry(key.clone())
            .or_insert_with(|| owner.to_string())
            .clone();
        if holder != owner {
            return Err(Error::validation_for(
                owner,
                format!("{key} is already used by {holder}"),
            ));
        }
        Ok(())
    }

    /// Close every pooled session
    pub async fn close(&self) {
        self.sessions.close_all().await;
    }
}

/// Deserialize typed arguments from resolved inputs
///
/// Shape errors become validation errors against the node.
pub fn parse_inputs<T: DeserializeOwned>(id: &str, inputs: &Value) -> Result<T> {
    serde_json::from_value(inputs.clone())
        .map_err(|e| Error::validation_for(id, format!("invalid inputs: {e}")))
}

/// Serialize typed outputs into the engine's value form
pub fn to_outputs<T: Serialize>(kind: &str, outputs: &T) -> Result<Value> {
    serde_json::to_value(outputs).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}
