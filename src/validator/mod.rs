//! Agave validator service (`svm:validator:Agave`)
//!
//! A validator is a long-running `agave-validator` process under systemd.
//! Applying the resource renders three artifacts from its inputs:
//!
//! - the `agave-validator` flag list
//! - the start script at `/home/sol/bin/validator.sh`
//! - the `svmkit-validator` unit
//!
//! Those and the key files are then staged on the host and the service is
//! (re)started. A digest over everything staged is written next to the unit;
//! when the digest matches and the service is active the install is skipped.
//!
//! Changes that would orphan ledger or account data, or move the validator
//! to a different identity, are replacements. Anything else is an update
//! that re-renders and restarts in place.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::flags::FlagBuilder;
use crate::keypair::{KeyPair, PublicKey, SecretBlob};
use crate::resource::{
    parse_inputs, to_outputs, ApplyContext, DeletionPolicy, DiffKind, Resource, VALIDATOR_TYPE,
};
use crate::ssh::{Connection, PayloadFile, Script};
use crate::template::{Asset, TemplateEngine};
use crate::{Error, Result};

/// Identity key file consumed by `--identity`
pub const IDENTITY_KEY_PATH: &str = "/home/sol/validator-keypair.json";
/// Vote account key file consumed by `--vote-account`
pub const VOTE_ACCOUNT_KEY_PATH: &str = "/home/sol/vote-account-keypair.json";
/// Start script executed by the unit
pub const START_SCRIPT_PATH: &str = "/home/sol/bin/validator.sh";
/// systemd unit file
pub const UNIT_PATH: &str = "/etc/systemd/system/svmkit-validator.service";
/// systemd service name
pub const SERVICE_NAME: &str = "svmkit-validator";

const BIN_DIR: &str = "/home/sol/bin";
const CONFIG_MARKER_PATH: &str = "/home/sol/.svmkit-validator";
const DEFAULT_GRACE_PERIOD_SECS: u64 = 60;

const START_SCRIPT_TEMPLATE: Asset = Asset::new("validator.sh", include_str!("assets/validator.sh.j2"));
const UNIT_TEMPLATE: Asset = Asset::new(
    "svmkit-validator.service",
    include_str!("assets/svmkit-validator.service.j2"),
);
const INSTALL_TEMPLATE: Asset = Asset::new("validator-install.sh", include_str!("assets/install.sh.j2"));
const DELETE_TEMPLATE: Asset = Asset::new("validator-delete.sh", include_str!("assets/delete.sh.j2"));

/// Secret key material the validator runs with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairs {
    /// Node identity
    pub identity: SecretBlob,
    /// Vote account
    pub vote_account: SecretBlob,
}

/// Where the validator keeps its data
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidatorPaths {
    /// Accounts database directory
    pub accounts: String,
    /// Ledger directory
    pub ledger: String,
    /// Log file
    pub log: String,
}

impl Default for ValidatorPaths {
    fn default() -> Self {
        Self {
            accounts: "/home/sol/accounts".to_string(),
            ledger: "/home/sol/ledger".to_string(),
            log: "/home/sol/log".to_string(),
        }
    }
}

/// `agave-validator` options
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorFlags {
    /// Gossip entrypoints (`host:port`); required unless bootstrapping
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_point: Vec<String>,
    /// Validators trusted for snapshots and repair
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_validator: Vec<PublicKey>,
    /// Genesis hash the ledger must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_genesis_hash: Option<String>,
    /// JSON RPC port
    pub rpc_port: u32,
    /// Gossip port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip_port: Option<u32>,
    /// `lo-hi` range for dynamically assigned ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_port_range: Option<String>,
    /// Address the RPC service binds to
    pub rpc_bind_address: String,
    /// Do not publish the RPC port
    #[serde(rename = "privateRPC", default, skip_serializing_if = "Option::is_none")]
    pub private_rpc: Option<bool>,
    /// Only fetch snapshots from known validators
    #[serde(rename = "onlyKnownRPC", default, skip_serializing_if = "Option::is_none")]
    pub only_known_rpc: Option<bool>,
    /// Expose the full RPC API
    #[serde(rename = "fullRpcAPI", default, skip_serializing_if = "Option::is_none")]
    pub full_rpc_api: Option<bool>,
    /// RocksDB WAL recovery mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal_recovery_mode: Option<String>,
    /// Shreds to retain in the ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_ledger_size: Option<u64>,
    /// `central-scheduler` or `thread-local-multi-iterator`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_production_method: Option<String>,
    /// Slots between full snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_snapshot_interval_slots: Option<u64>,
    /// Produce blocks without waiting for a first vote
    #[serde(default)]
    pub no_wait_for_vote_to_start_leader: bool,
    /// Run without voting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_voting: Option<bool>,
    /// TVU receive threads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvu_receive_threads: Option<u32>,
    /// Accept private addresses in gossip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_private_addr: Option<bool>,
    /// Shred version the cluster must report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_shred_version: Option<u32>,
    /// Slots between incremental snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_interval_slots: Option<u64>,
    /// Full snapshot archives kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_full_snapshots_to_retain: Option<u32>,
    /// Incremental snapshot archives kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_incremental_snapshots_to_retain: Option<u32>,
    /// Slot to wait at until a supermajority of stake is visible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_supermajority: Option<u64>,
    /// Address advertised in gossip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip_host: Option<String>,
    /// Faucet for `requestAirdrop`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_faucet_address: Option<String>,
    /// Passed through after every other flag
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_flags: Vec<String>,
}

impl ValidatorFlags {
    /// `agave-validator` arguments in a fixed order
    pub fn args(&self, paths: &ValidatorPaths) -> FlagBuilder {
        let mut b = FlagBuilder::new();
        b.append("identity", IDENTITY_KEY_PATH)
            .append("vote-account", VOTE_ACCOUNT_KEY_PATH)
            .append_list("entrypoint", &self.entry_point)
            .append_list("known-validator", &self.known_validator)
            .append_opt("expected-genesis-hash", self.expected_genesis_hash.as_ref())
            .append("rpc-port", self.rpc_port)
            .append_opt("dynamic-port-range", self.dynamic_port_range.as_ref())
            .append_opt("gossip-port", self.gossip_port)
            .append("rpc-bind-address", &self.rpc_bind_address)
            .append_opt("wal-recovery-mode", self.wal_recovery_mode.as_ref())
            .append("log", &paths.log)
            .append("accounts", &paths.accounts)
            .append("ledger", &paths.ledger)
            .append_opt("limit-ledger-size", self.limit_ledger_size)
            .append_opt("block-production-method", self.block_production_method.as_ref())
            .append_opt("tvu-receive-threads", self.tvu_receive_threads)
            .append_opt("full-snapshot-interval-slots", self.full_snapshot_interval_slots)
            .append_bool(
                "no-wait-for-vote-to-start-leader",
                Some(self.no_wait_for_vote_to_start_leader),
            )
            .append_bool("only-known-rpc", self.only_known_rpc)
            .append_bool("private-rpc", self.private_rpc)
            .append_bool("full-rpc-api", self.full_rpc_api)
            .append_bool("no-voting", self.no_voting)
            .append_bool("allow-private-addr", self.allow_private_addr)
            .append_opt("expected-shred-version", self.expected_shred_version)
            .append_opt("snapshot-interval-slots", self.snapshot_interval_slots)
            .append_opt(
                "maximum-full-snapshots-to-retain",
                self.maximum_full_snapshots_to_retain,
            )
            .append_opt(
                "maximum-incremental-snapshots-to-retain",
                self.maximum_incremental_snapshots_to_retain,
            )
            .append_opt("wait-for-supermajority", self.wait_for_supermajority)
            .append_opt("gossip-host", self.gossip_host.as_ref())
            .append_opt("rpc-faucet-address", self.rpc_faucet_address.as_ref())
            .extend_raw(self.extra_flags.iter().cloned());
        b
    }

    /// Every port the process binds: RPC, gossip, then the dynamic range
    fn ports(&self) -> Vec<u32> {
        let mut ports = vec![self.rpc_port];
        ports.extend(self.gossip_port);
        if let Some(Ok((lo, hi))) = self.dynamic_port_range.as_deref().map(parse_port_range) {
            ports.extend(lo..=hi);
        }
        ports
    }
}

/// Parse `lo-hi` into an inclusive range of valid ports with `lo < hi`
pub fn parse_port_range(range: &str) -> std::result::Result<(u32, u32), String> {
    let (lo, hi) = range
        .split_once('-')
        .ok_or_else(|| format!("{range:?} is not of the form lo-hi"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| format!("{s:?} in {range:?} is not a port number"))
    };
    let (lo, hi) = (parse(lo)?, parse(hi)?);
    for port in [lo, hi] {
        check_port(port)?;
    }
    if lo >= hi {
        return Err(format!("range {range:?} is empty; low end must be below high end"));
    }
    Ok((lo, hi))
}

fn check_port(port: u32) -> std::result::Result<(), String> {
    if (1..=u32::from(u16::MAX)).contains(&port) {
        Ok(())
    } else {
        Err(format!("port {port} is outside 1-65535"))
    }
}

/// InfluxDB target for validator metrics
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// InfluxDB URL
    pub url: String,
    /// Database name
    pub database: String,
    /// User name
    pub user: String,
    /// Password; may be empty
    #[serde(default)]
    pub password: String,
}

impl Metrics {
    /// Value of `SOLANA_METRICS_CONFIG`
    pub fn config_string(&self) -> String {
        format!(
            "host={},db={},u={},p={}",
            self.url, self.database, self.user, self.password
        )
    }
}

/// How the service is stopped on delete
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownPolicy {
    /// Seconds `systemctl stop` may take before the process is killed
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

fn default_grace_period() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }
}

/// Inputs of a validator resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgaveArgs {
    /// Validator host
    pub connection: Connection,
    /// Identity and vote account secrets
    pub key_pairs: KeyPairs,
    /// `agave-validator` options
    pub flags: ValidatorFlags,
    /// Data locations
    #[serde(default)]
    pub paths: ValidatorPaths,
    /// This node originates the network and needs no entrypoint
    #[serde(default)]
    pub bootstrap: bool,
    /// Extra environment for the validator process
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Metrics reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    /// Stop behaviour
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,
    /// File handling on delete
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    /// Package version to install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AgaveArgs {
    /// Reject inputs the validator would fail on, before touching the host
    pub fn validate(&self, id: &str) -> Result<()> {
        self.connection.validate()?;

        let flags = &self.flags;
        if !self.bootstrap && flags.entry_point.is_empty() {
            return Err(Error::validation_for_field(
                id,
                "flags.entryPoint",
                "at least one entrypoint is required unless bootstrap is set",
            ));
        }

        check_port(flags.rpc_port).map_err(|e| Error::validation_for_field(id, "flags.rpcPort", e))?;
        if let Some(port) = flags.gossip_port {
            check_port(port).map_err(|e| Error::validation_for_field(id, "flags.gossipPort", e))?;
        }
        if let Some(range) = &flags.dynamic_port_range {
            parse_port_range(range)
                .map_err(|e| Error::validation_for_field(id, "flags.dynamicPortRange", e))?;
        }
        if let Some(hash) = &flags.expected_genesis_hash {
            let valid = bs58::decode(hash).into_vec().map(|b| b.len() == 32).unwrap_or(false);
            if !valid {
                return Err(Error::validation_for_field(
                    id,
                    "flags.expectedGenesisHash",
                    format!("{hash:?} is not a base58 32-byte hash"),
                ));
            }
        }

        for (name, path) in [
            ("paths.accounts", &self.paths.accounts),
            ("paths.ledger", &self.paths.ledger),
            ("paths.log", &self.paths.log),
        ] {
            if !path.starts_with('/') {
                return Err(Error::validation_for_field(
                    id,
                    name,
                    format!("must be an absolute path, got {path:?}"),
                ));
            }
        }

        for name in self.environment.keys() {
            if !is_env_name(name) {
                return Err(Error::validation_for_field(
                    id,
                    format!("environment.{name}"),
                    "not a valid environment variable name",
                ));
            }
        }

        if let Some(metrics) = &self.metrics {
            for (name, value) in [
                ("metrics.url", &metrics.url),
                ("metrics.database", &metrics.database),
                ("metrics.user", &metrics.user),
            ] {
                if value.is_empty() {
                    return Err(Error::validation_for_field(id, name, "cannot be empty"));
                }
            }
        }

        self.identity(id)?;
        self.vote_account(id)?;
        Ok(())
    }

    fn identity(&self, id: &str) -> Result<KeyPair> {
        KeyPair::from_secret_blob("identity", &self.key_pairs.identity)
            .map_err(|e| Error::validation_for_field(id, "keyPairs.identity", e.to_string()))
    }

    fn vote_account(&self, id: &str) -> Result<KeyPair> {
        KeyPair::from_secret_blob("voteAccount", &self.key_pairs.vote_account)
            .map_err(|e| Error::validation_for_field(id, "keyPairs.voteAccount", e.to_string()))
    }

    /// Process environment: the `environment` map plus the metrics config
    pub fn process_environment(&self) -> BTreeMap<String, String> {
        let mut env = self.environment.clone();
        if let Some(metrics) = &self.metrics {
            env.insert("SOLANA_METRICS_CONFIG".to_string(), metrics.config_string());
        }
        env
    }

    /// Host-local names this validator occupies
    fn claims(&self) -> Vec<String> {
        let host = &self.connection.host;
        let mut claims = vec![format!("{host}:unit/{SERVICE_NAME}")];
        claims.extend(self.flags.ports().into_iter().map(|p| format!("{host}:port/{p}")));
        claims
    }

    /// Whether moving from `self` to `new` needs a fresh validator
    fn requires_replacement(&self, new: &AgaveArgs) -> bool {
        self.key_pairs != new.key_pairs
            || self.paths.ledger != new.paths.ledger
            || self.paths.accounts != new.paths.accounts
            || self.connection.host != new.connection.host
            || self.bootstrap != new.bootstrap
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Live state of the systemd service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Active, activating or reloading
    Running,
    /// Inactive or unknown
    Stopped,
    /// systemd gave up on the service
    Failed,
}

impl ServiceStatus {
    /// Map `systemctl is-active` output
    pub fn from_is_active(output: &str) -> Self {
        match output.trim() {
            "active" | "activating" | "reloading" => ServiceStatus::Running,
            "failed" => ServiceStatus::Failed,
            _ => ServiceStatus::Stopped,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outputs of a validator resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgaveOutputs {
    /// Node identity
    pub identity_pubkey: PublicKey,
    /// Vote account
    pub vote_account_pubkey: PublicKey,
    /// Digest of everything staged on the host
    pub config_digest: String,
    /// Service state after the last apply
    pub status: ServiceStatus,
}

/// Rendered artifacts for one validator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedValidator {
    /// `agave-validator` arguments
    pub flags: FlagBuilder,
    /// Contents of the start script
    pub start_script: String,
    /// Contents of the systemd unit
    pub unit: String,
    /// Packages installed on the host
    pub packages: Vec<String>,
    /// Digest over script, unit, packages and key files
    pub config_digest: String,
}

fn packages(version: Option<&str>) -> Vec<String> {
    let pinned = |name: &str| match version {
        Some(v) => format!("{name}={v}"),
        None => name.to_string(),
    };
    vec![
        "ufw".to_string(),
        "logrotate".to_string(),
        "jq".to_string(),
        pinned("svmkit-solana-cli"),
        pinned("svmkit-agave-validator"),
    ]
}

/// Render flags, start script and unit, and digest them with the key files
pub fn render(engine: &TemplateEngine, args: &AgaveArgs) -> Result<RenderedValidator> {
    let flags = args.flags.args(&args.paths);
    let environment: Vec<Value> = args
        .process_environment()
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let start_script = engine.render(
        &START_SCRIPT_TEMPLATE,
        json!({ "environment": environment, "flags": flags.to_shell() }),
    )?;
    let unit = engine.render(
        &UNIT_TEMPLATE,
        json!({
            "start_script": START_SCRIPT_PATH,
            "grace_period_secs": args.shutdown_policy.grace_period_secs,
        }),
    )?;
    let packages = packages(args.version.as_deref());

    let mut hasher = Sha256::new();
    for part in [
        start_script.as_str(),
        unit.as_str(),
        args.key_pairs.identity.expose(),
        args.key_pairs.vote_account.expose(),
    ]
    .into_iter()
    .chain(packages.iter().map(String::as_str))
    {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let config_digest = bs58::encode(hasher.finalize()).into_string();

    Ok(RenderedValidator {
        flags,
        start_script,
        unit,
        packages,
        config_digest,
    })
}

/// Build the install-and-restart script
pub fn install_script(engine: &TemplateEngine, args: &AgaveArgs, rendered: &RenderedValidator) -> Result<Script> {
    let body = engine.render(
        &INSTALL_TEMPLATE,
        json!({
            "packages": rendered.packages,
            "bin_dir": BIN_DIR,
            "key_files": [IDENTITY_KEY_PATH, VOTE_ACCOUNT_KEY_PATH],
            "marker": CONFIG_MARKER_PATH,
            "service": SERVICE_NAME,
        }),
    )?;

    Ok(Script::new("validator-install", body)
        .with_env("LEDGER_PATH", &args.paths.ledger)
        .with_env("ACCOUNTS_PATH", &args.paths.accounts)
        .with_env("LOG_PATH", &args.paths.log)
        .with_env("CONFIG_DIGEST", &rendered.config_digest)
        .with_file(PayloadFile::secret(IDENTITY_KEY_PATH, args.key_pairs.identity.expose()))
        .with_file(PayloadFile::secret(
            VOTE_ACCOUNT_KEY_PATH,
            args.key_pairs.vote_account.expose(),
        ))
        .with_file(PayloadFile::new(START_SCRIPT_PATH, &rendered.start_script, 0o755))
        .with_file(PayloadFile::new(UNIT_PATH, &rendered.unit, 0o644))
        .with_check(format!(
            r#"test "$(cat {CONFIG_MARKER_PATH} 2>/dev/null)" = "$CONFIG_DIGEST" && systemctl is-active --quiet {SERVICE_NAME}"#
        )))
}

/// Build the stop-and-remove script
pub fn delete_script(engine: &TemplateEngine, args: &AgaveArgs) -> Result<Script> {
    let body = engine.render(
        &DELETE_TEMPLATE,
        json!({
            "service": SERVICE_NAME,
            "grace_period_secs": args.shutdown_policy.grace_period_secs,
            "unit_path": UNIT_PATH,
            "marker": CONFIG_MARKER_PATH,
            "start_script": START_SCRIPT_PATH,
            "key_files": [IDENTITY_KEY_PATH, VOTE_ACCOUNT_KEY_PATH],
            "remove_files": args.deletion_policy.removes_files(),
        }),
    )?;
    Ok(Script::new("validator-delete", body)
        .with_env("LEDGER_PATH", &args.paths.ledger)
        .with_env("ACCOUNTS_PATH", &args.paths.accounts)
        .with_env("LOG_PATH", &args.paths.log))
}

/// Query `systemctl is-active` for the validator service
pub async fn status(ctx: &ApplyContext, connection: &Connection) -> Result<ServiceStatus> {
    let script = Script::new(
        "validator-status",
        format!("systemctl is-active {SERVICE_NAME} || true\n"),
    );
    let result = ctx.session(connection).await?.run(&script).await?;
    Ok(ServiceStatus::from_is_active(&result.stdout))
}

/// Lifecycle for `svm:validator:Agave`
pub struct AgaveResource;

impl AgaveResource {
    async fn apply(&self, ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<Value> {
        let args: AgaveArgs = parse_inputs(id, inputs)?;
        args.validate(id)?;
        let identity = args.identity(id)?.public_key();
        let vote_account = args.vote_account(id)?.public_key();

        let rendered = render(ctx.templates(), &args)?;
        let script = install_script(ctx.templates(), &args, &rendered)?;

        let session = ctx.session(&args.connection).await?;
        let result = session.run(&script).await?;
        if result.satisfied {
            debug!(digest = %rendered.config_digest, "validator already configured");
        }

        let status = status(ctx, &args.connection).await?;
        info!(%identity, %status, "validator applied");
        to_outputs(
            VALIDATOR_TYPE,
            &AgaveOutputs {
                identity_pubkey: identity,
                vote_account_pubkey: vote_account,
                config_digest: rendered.config_digest,
                status,
            },
        )
    }
}

#[async_trait]
impl Resource for AgaveResource {
    fn type_token(&self) -> &'static str {
        VALIDATOR_TYPE
    }

    fn check(&self, ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<()> {
        let args: AgaveArgs = parse_inputs(id, inputs)?;
        args.validate(id)?;
        for claim in args.claims() {
            ctx.claim(claim, id)?;
        }
        Ok(())
    }

    fn diff(&self, id: &str, old: &Value, new: &Value) -> Result<DiffKind> {
        let new: AgaveArgs = parse_inputs(id, new)?;
        let Ok(old) = parse_inputs::<AgaveArgs>(id, old) else {
            return Ok(DiffKind::Replace);
        };
        Ok(if old.requires_replacement(&new) {
            DiffKind::Replace
        } else {
            DiffKind::Update
        })
    }

    #[instrument(skip_all, fields(node = %id, operation = "create"))]
    async fn create(&self, ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<Value> {
        self.apply(ctx, id, inputs).await
    }

    #[instrument(skip_all, fields(node = %id, operation = "update"))]
    async fn update(
        &self,
        ctx: &ApplyContext,
        id: &str,
        _old_outputs: &Value,
        inputs: &Value,
    ) -> Result<Value> {
        // Install restarts the unit whenever the digest moved; data dirs are untouched
        self.apply(ctx, id, inputs).await
    }

    #[instrument(skip_all, fields(node = %id, operation = "delete"))]
    async fn delete(&self, ctx: &ApplyContext, id: &str, inputs: &Value, _outputs: &Value) -> Result<()> {
        let args: AgaveArgs = parse_inputs(id, inputs)?;
        let script = delete_script(ctx.templates(), &args)?;
        ctx.session(&args.connection).await?.run(&script).await?;
        info!(policy = ?args.deletion_policy, "validator removed");
        Ok(())
    }
}
