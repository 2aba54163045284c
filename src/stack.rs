//! Stack documents
//!
//! A stack is a YAML document declaring resources by name:
//!
//! ```yaml
//! resources:
//!   validator-key:
//!     type: svm:KeyPair
//!   genesis:
//!     type: svm:genesis:Solana
//!     properties:
//!       connection: { host: 10.0.0.1, user: admin, privateKey: "${file:~/.ssh/id_ed25519}" }
//!       flags:
//!         ledgerPath: /home/sol/ledger
//!         identityPubkey: ${validator-key.publicKey}
//!   validator:
//!     type: svm:validator:Agave
//!     properties:
//!       flags:
//!         expectedGenesisHash: ${genesis.genesisHash}
//!     options:
//!       dependsOn: [genesis]
//! ```
//!
//! String properties may embed references with `${...}`:
//!
//! - `${node.path}` reads a field of another node's outputs. A string that is
//!   exactly one reference takes the referenced value with its type; a
//!   reference inside other text is rendered into the string.
//! - `${env:NAME}` and `${file:PATH}` are read when the stack is loaded.
//! - `$${` is a literal `${`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::graph::{Graph, Input};
use crate::{Error, Result};

/// A parsed stack document
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stack {
    /// Optional stack name, used in logs
    #[serde(default)]
    pub name: Option<String>,
    /// Declared resources by node id
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDecl>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// One resource in a stack document
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDecl {
    /// Type token, e.g. `svm:validator:Agave`
    #[serde(rename = "type")]
    pub type_token: String,
    /// Inputs, possibly containing references
    #[serde(default)]
    pub properties: Value,
    /// Ordering edges without a data reference
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Pulumi-style resource options
    #[serde(default)]
    pub options: ResourceOptions,
}

/// Per-resource options
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceOptions {
    /// Ordering edges without a data reference
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Stack {
    /// Parse a stack from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::serialization_for_kind("stack", e.to_string()))
    }

    /// Read and parse a stack file
    ///
    /// Relative `${file:...}` paths resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context("stack", format!("reading {}: {e}", path.display()))
        })?;
        let mut stack = Self::from_yaml(&text)?;
        stack.base_dir = path.parent().map(Path::to_path_buf);
        debug!(path = %path.display(), resources = stack.resources.len(), "loaded stack");
        Ok(stack)
    }

    /// Declare every resource into a fresh graph
    ///
    /// Cycles and duplicate ids are rejected here, before anything runs.
    pub fn graph(&self) -> Result<Graph> {
        let mut graph = Graph::new();
        for (id, decl) in &self.resources {
            let inputs = self
                .to_input(&decl.properties)
                .map_err(|e| match e {
                    Error::Validation { message, .. } => Error::validation_for(id, message),
                    other => other,
                })?;
            let depends_on = decl
                .depends_on
                .iter()
                .chain(&decl.options.depends_on)
                .map(|d| strip_reference(d).to_string());
            graph.declare(id.clone(), decl.type_token.clone(), inputs, depends_on)?;
        }
        Ok(graph)
    }

    fn to_input(&self, value: &Value) -> Result<Input> {
        Ok(match value {
            Value::Null => Input::literal(Value::Object(Default::default())),
            Value::String(s) => self.parse_string(s)?,
            Value::Array(items) => {
                Input::List(items.iter().map(|v| self.to_input_inner(v)).collect::<Result<_>>()?)
            }
            Value::Object(fields) => Input::Object(
                fields
                    .iter()
                    .map(|(k, v)| -> Result<(String, Input)> { Ok((k.clone(), self.to_input_inner(v)?)) })
                    .collect::<Result<_>>()?,
            ),
            other => Input::Literal(other.clone()),
        })
    }

    fn to_input_inner(&self, value: &Value) -> Result<Input> {
        match value {
            Value::Null => Ok(Input::Literal(Value::Null)),
            other => self.to_input(other),
        }
    }

    fn parse_string(&self, text: &str) -> Result<Input> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("$${") {
                literal.push_str("${");
                rest = after;
            } else if let Some(after) = tail.strip_prefix("${") {
                let end = after
                    .find('}')
                    .ok_or_else(|| Error::validation(format!("unterminated reference in {text:?}")))?;
                let expr = after[..end].trim();
                match self.interpolate(expr)? {
                    Interpolated::Text(value) => literal.push_str(&value),
                    Interpolated::Reference(input) => {
                        if !literal.is_empty() {
                            pieces.push(Input::literal(std::mem::take(&mut literal)));
                        }
                        pieces.push(input);
                    }
                }
                rest = &after[end + 1..];
            } else {
                literal.push('$');
                rest = &tail[1..];
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            pieces.push(Input::literal(literal));
        }

        Ok(match pieces.len() {
            0 => Input::literal(""),
            1 => pieces.remove(0),
            _ => Input::Concat(pieces),
        })
    }

    fn interpolate(&self, expr: &str) -> Result<Interpolated> {
        if let Some(name) = expr.strip_prefix("env:") {
            return std::env::var(name)
                .map(Interpolated::Text)
                .map_err(|_| Error::validation(format!("environment variable {name} is not set")));
        }
        if let Some(path) = expr.strip_prefix("file:") {
            let path = self.resolve_path(path);
            return std::fs::read_to_string(&path).map(Interpolated::Text).map_err(|e| {
                Error::validation(format!("reading {}: {e}", path.display()))
            });
        }

        let (node, path) = expr.split_once('.').unwrap_or((expr, ""));
        if node.is_empty() {
            return Err(Error::validation(format!("empty reference ${{{expr}}}")));
        }
        Ok(Interpolated::Reference(Input::output(node, path)))
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
            (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
            _ => PathBuf::from(path),
        };
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

enum Interpolated {
    Text(String),
    Reference(Input),
}

/// `${name}` and `name` both name a node in `dependsOn`
fn strip_reference(value: &str) -> &str {
    value
        .strip_prefix("${")
        .and_then(|v| v.strip_suffix('}'))
        .unwrap_or(value)
        .trim()
}
