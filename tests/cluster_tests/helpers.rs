//! Shared fixtures: a recording transport and a bootstrap cluster stack

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use svmkit::graph::{EvaluationReport, Evaluator, Operation, StackState};
use svmkit::resource::{ApplyContext, ResourceRegistry};
use svmkit::retry::RetryConfig;
use svmkit::ssh::{Connection, ExecutionResult, Session, Transport};
use svmkit::stack::Stack;
use svmkit::Result;

/// Host used by the bootstrap genesis and validator
pub const BOOTSTRAP_HOST: &str = "10.0.0.1";

/// One script the engine sent to a host
#[derive(Clone, Debug)]
pub struct Sent {
    pub host: String,
    pub script: String,
}

impl Sent {
    /// Idempotency checks are rendered with `set -u` only
    pub fn is_check(&self) -> bool {
        self.script.starts_with("set -u\n")
    }
}

struct Failure {
    needle: String,
    exit_status: i32,
    stderr: String,
}

#[derive(Default)]
struct Recorder {
    sent: Vec<Sent>,
    opens: usize,
    failures: Vec<Failure>,
    /// Config digest of the last ledger built on each host
    built: HashMap<String, String>,
}

/// Transport that records every script and answers from canned rules
///
/// Checks always report "not satisfied" so bodies run. `systemctl is-active`
/// answers `active`. Reading the recorded genesis hash answers a hash derived
/// from the config digest of the last ledger built on that host. Any body
/// containing a registered needle fails.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorder>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any script body containing `needle`
    pub fn fail_when(&self, needle: &str, exit_status: i32, stderr: &str) {
        self.inner.lock().unwrap().failures.push(Failure {
            needle: needle.to_string(),
            exit_status,
            stderr: stderr.to_string(),
        });
    }

    /// Every script sent, in order
    pub fn sent(&self) -> Vec<Sent> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Script bodies only, without idempotency checks
    pub fn bodies(&self) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| !s.is_check()).collect()
    }

    /// Index of the first body containing `needle`
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.bodies().iter().position(|s| s.script.contains(needle))
    }

    /// Number of sessions opened
    pub fn opens(&self) -> usize {
        self.inner.lock().unwrap().opens
    }

    /// Forget everything recorded so far, keeping failure rules
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sent.clear();
        inner.opens = 0;
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn open(&self, connection: &Connection) -> Result<Arc<dyn Session>> {
        self.inner.lock().unwrap().opens += 1;
        Ok(Arc::new(RecordingSession {
            host: connection.host.clone(),
            inner: self.inner.clone(),
        }))
    }
}

struct RecordingSession {
    host: String,
    inner: Arc<Mutex<Recorder>>,
}

#[async_trait]
impl Session for RecordingSession {
    fn host(&self) -> String {
        self.host.clone()
    }

    async fn exec(&self, script: &str) -> Result<ExecutionResult> {
        let mut inner = self.inner.lock().unwrap();
        let sent = Sent {
            host: self.host.clone(),
            script: script.to_string(),
        };
        let is_check = sent.is_check();
        inner.sent.push(sent);

        if is_check {
            return Ok(ExecutionResult {
                exit_status: 1,
                ..Default::default()
            });
        }
        if let Some(failure) = inner.failures.iter().find(|f| script.contains(&f.needle)) {
            return Ok(ExecutionResult {
                exit_status: failure.exit_status,
                stderr: failure.stderr.clone(),
                ..Default::default()
            });
        }
        if script.contains("solana-genesis") {
            if let Some(digest) = exported(script, "CONFIG_DIGEST") {
                inner.built.insert(self.host.clone(), digest);
            }
        }
        let stdout = if script.contains("systemctl is-active svmkit-validator") {
            "active\n".to_string()
        } else if script.contains(r#"cat "$LEDGER_PATH/.svmkit-genesis-hash""#) {
            let digest = inner.built.get(&self.host).cloned().unwrap_or_default();
            format!("{}\n", ledger_hash(&digest))
        } else {
            String::new()
        };
        Ok(ExecutionResult {
            stdout,
            ..Default::default()
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Value of `export NAME=...` in a rendered script
fn exported(script: &str, name: &str) -> Option<String> {
    let prefix = format!("export {name}=");
    script
        .lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .map(|value| value.trim_matches('\'').to_string())
}

/// Stand-in for the hash agave-ledger-tool reports for a ledger
pub fn ledger_hash(config_digest: &str) -> String {
    let digest = Sha256::digest(format!("ledger:{config_digest}").as_bytes());
    bs58::encode(digest).into_string()
}

/// Knobs for the bootstrap cluster stack
pub struct ClusterSpec {
    pub treasury_lamports: u64,
    pub rpc_port: u16,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            treasury_lamports: 100_000_000_000_000,
            rpc_port: 8899,
        }
    }
}

const BOOTSTRAP_STACK: &str = r#"
name: bootstrap
resources:
  identity:
    type: svm:KeyPair
  vote-account:
    type: svm:KeyPair
  stake-account:
    type: svm:KeyPair
  treasury:
    type: svmkit:KeyPair
  genesis:
    type: svm:genesis:Solana
    properties:
      connection: { host: "@HOST@", user: admin, privateKey: TEST-KEY }
      flags:
        ledgerPath: /home/sol/ledger
        identityPubkey: ${identity.publicKey}
        votePubkey: ${vote-account.publicKey}
        stakePubkey: ${stake-account.publicKey}
      primordial:
        - pubkey: ${identity.publicKey}
          lamports: "10000000000"
        - pubkey: ${treasury.publicKey}
          lamports: "@TREASURY@"
  validator:
    type: svm:validator:Agave
    properties:
      connection: { host: "@HOST@", user: admin, privateKey: TEST-KEY }
      bootstrap: true
      keyPairs:
        identity: ${identity.json}
        voteAccount: ${vote-account.json}
      flags:
        rpcPort: @RPC_PORT@
        gossipPort: 8001
        dynamicPortRange: 8002-8020
        rpcBindAddress: 0.0.0.0
        expectedGenesisHash: ${genesis.genesisHash}
        fullRpcAPI: true
"#;

/// Key pairs, a genesis ledger and a bootstrap validator on one host
pub fn bootstrap_stack(spec: &ClusterSpec) -> Stack {
    let yaml = BOOTSTRAP_STACK
        .replace("@HOST@", BOOTSTRAP_HOST)
        .replace("@TREASURY@", &spec.treasury_lamports.to_string())
        .replace("@RPC_PORT@", &spec.rpc_port.to_string());
    Stack::from_yaml(&yaml).expect("bootstrap stack parses")
}

/// Evaluate a stack the way the CLI does: fresh context, prior state in
pub async fn evaluate(transport: &RecordingTransport, stack: &Stack, prior: &StackState) -> EvaluationReport {
    let graph = stack.graph().expect("stack declares cleanly");
    evaluator(transport)
        .evaluate(&graph, prior, &CancellationToken::new())
        .await
        .expect("evaluation starts")
}

/// Tear down everything in `prior`
pub async fn destroy(transport: &RecordingTransport, prior: &StackState) -> EvaluationReport {
    evaluator(transport)
        .destroy(prior, &CancellationToken::new())
        .await
}

fn evaluator(transport: &RecordingTransport) -> Evaluator {
    let ctx = ApplyContext::new(Arc::new(transport.clone()), RetryConfig::default());
    Evaluator::new(ResourceRegistry::builtin(), ctx)
}

/// Operation recorded for a node
pub fn operation(report: &EvaluationReport, id: &str) -> Option<Operation> {
    report.get(id).and_then(|n| n.operation)
}
