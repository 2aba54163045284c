//! Persisted results of the last evaluation
//!
//! The state file records, per node, the inputs a resource was last applied
//! with and the outputs it produced. The next evaluation diffs against it.
//! Outputs include secret key material, so the file is owner-only.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Current on-disk format
pub const STATE_VERSION: u32 = 1;

/// What was applied for one node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    /// Resource type token
    #[serde(rename = "type")]
    pub type_token: String,
    /// Resolved inputs the resource was applied with
    pub inputs: Value,
    /// Outputs returned by the lifecycle call
    pub outputs: Value,
    /// Nodes this one depended on when applied
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

/// Every applied node, keyed by id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    resources: BTreeMap<String, ResourceState>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for StackState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resources: BTreeMap::new(),
        }
    }
}

impl StackState {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from a file; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file, starting empty");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::internal_with_context(
                    "state",
                    format!("reading {}: {e}", path.display()),
                ))
            }
        };
        let state: StackState = serde_json::from_str(&text)
            .map_err(|e| Error::serialization_for_kind("state", e.to_string()))?;
        if state.version != STATE_VERSION {
            return Err(Error::serialization_for_kind(
                "state",
                format!("unsupported state version {}", state.version),
            ));
        }
        Ok(state)
    }

    /// Write state atomically with 0600 permissions
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |e: std::io::Error| {
            Error::internal_with_context("state", format!("writing {}: {e}", path.display()))
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let text = serde_json::to_string_pretty(self)?;

        // NamedTempFile is created 0600 in the target directory, then renamed over
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        std::io::Write::write_all(&mut tmp, text.as_bytes()).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Record for a node
    pub fn get(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Replace the record for a node
    pub fn insert(&mut self, id: impl Into<String>, record: ResourceState) {
        self.resources.insert(id.into(), record);
    }

    /// Drop the record for a node
    pub fn remove(&mut self, id: &str) -> Option<ResourceState> {
        self.resources.remove(id)
    }

    /// All records, ordered by id
    pub fn resources(&self) -> impl Iterator<Item = (&String, &ResourceState)> {
        self.resources.iter()
    }

    /// Node ids with a record
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.resources.keys()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing has been applied
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Ids with dependents before their dependencies, for teardown
    pub fn teardown_order(&self) -> Vec<String> {
        let mut order = super::topological_order(
            self.resources
                .iter()
                .map(|(id, r)| (id.clone(), r.dependencies.clone())),
        );
        order.reverse();
        order
    }
}
