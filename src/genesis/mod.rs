//! Genesis ledger construction (`svm:genesis:Solana`)
//!
//! Builds the initial ledger of a new network on the bootstrap host:
//!
//! 1. the primordial accounts table is written to `/home/sol/primordial.yaml`,
//!    and any additional staked validators to `/home/sol/validator_accounts.yaml`
//! 2. `solana-genesis` is invoked with the bootstrap identity, vote and stake
//!    keys and the configured ledger parameters
//! 3. the hash of the new ledger is read back with `agave-ledger-tool` and
//!    returned as `genesisHash`
//!
//! # Config digest
//!
//! The config digest is a SHA-256 over the canonical rendering: the
//! `solana-genesis` argument list followed by the primordial and validator
//! account tables, base58-encoded. It depends only on flags, account entries
//! and public keys, so declaration order of the primordial list never changes
//! it. When `creationTime` is unset a fixed creation time is passed, so equal
//! digests build equal ledgers and therefore equal genesis hashes.
//!
//! The digest is stored in a marker inside the ledger directory, which makes
//! creation idempotent. A ledger with a foreign (or missing) marker is an
//! incompatible ledger and is never overwritten unless the deletion policy
//! allows it. Deleting under the `keep` policy retires the marker instead of
//! removing it; the next create archives a retired ledger next to the ledger
//! path (or reuses it when it was built from the same digest).
//!
//! A genesis ledger is immutable, so every input change is a replacement.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::flags::FlagBuilder;
use crate::keypair::PublicKey;
use crate::resource::{
    parse_inputs, to_outputs, ApplyContext, DeletionPolicy, DiffKind, Resource, GENESIS_TYPE,
};
use crate::ssh::{Connection, PayloadFile, Script};
use crate::template::{Asset, TemplateEngine};
use crate::{Error, Result};

/// Where the primordial accounts table is written on the host
pub const PRIMORDIAL_PATH: &str = "/home/sol/primordial.yaml";

/// Where additional staked validators are written on the host
pub const VALIDATOR_ACCOUNTS_PATH: &str = "/home/sol/validator_accounts.yaml";

/// Owner of primordial accounts that do not name one: the system program
pub const SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";

/// Creation time used when the stack does not set `creationTime`
pub const DEFAULT_CREATION_TIME: &str = "2024-01-01T00:00:00+00:00";

/// Exit status the create script uses for an incompatible existing ledger
const INCOMPATIBLE_LEDGER_STATUS: i32 = 90;

const CREATE_TEMPLATE: Asset = Asset::new("genesis-create.sh", include_str!("assets/create.sh.j2"));
const DELETE_TEMPLATE: Asset = Asset::new("genesis-delete.sh", include_str!("assets/delete.sh.j2"));

/// Accept `12500` as well as `"12500"` for numeric strings
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

fn optional_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);
    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

fn system_program() -> PublicKey {
    // All-zero key; base58 of 32 zero bytes is 32 '1's
    PublicKey::default()
}

/// A pre-funded account baked into the genesis ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimordialEntry {
    /// Account address
    pub pubkey: PublicKey,
    /// Balance as a decimal string
    #[serde(deserialize_with = "string_or_number")]
    pub lamports: String,
    /// Owning program
    #[serde(default = "system_program")]
    pub owner: PublicKey,
    /// Whether the account holds an executable program
    #[serde(default)]
    pub executable: bool,
    /// Base64 account data
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
}

impl PrimordialEntry {
    /// System-owned, non-executable entry without data
    pub fn new(pubkey: PublicKey, lamports: impl Into<String>) -> Self {
        Self {
            pubkey,
            lamports: lamports.into(),
            owner: system_program(),
            executable: false,
            data: String::new(),
        }
    }

    fn balance(&self) -> std::result::Result<u64, String> {
        if self.lamports.is_empty() || !self.lamports.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("{:?} is not a non-negative integer", self.lamports));
        }
        self.lamports
            .parse()
            .map_err(|_| format!("{} exceeds the largest account balance", self.lamports))
    }
}

/// One account in `primordial.yaml`, keyed by pubkey
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct PrimordialAccount {
    balance: u64,
    owner: String,
    data: String,
    executable: bool,
}

/// Fold entries into the table `solana-genesis` reads
///
/// Entries for the same pubkey each allocate their balance, so their
/// lamports add up; they must agree on owner, data and executable.
/// Errors carry the offending field path.
fn primordial_table(
    entries: &[PrimordialEntry],
) -> std::result::Result<BTreeMap<String, PrimordialAccount>, (String, String)> {
    let mut table = BTreeMap::new();
    for (i, entry) in entries.iter().enumerate() {
        let balance = entry
            .balance()
            .map_err(|msg| (format!("primordial[{i}].lamports"), msg))?;
        let account = PrimordialAccount {
            balance,
            owner: entry.owner.to_string(),
            data: entry.data.clone(),
            executable: entry.executable,
        };
        match table.entry(entry.pubkey.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(account);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.owner != account.owner
                    || existing.data != account.data
                    || existing.executable != account.executable
                {
                    return Err((
                        format!("primordial[{i}]"),
                        format!("{} is listed twice with different owner, data or executable", entry.pubkey),
                    ));
                }
                existing.balance = existing.balance.checked_add(balance).ok_or_else(|| {
                    (
                        format!("primordial[{i}].lamports"),
                        format!("total balance of {} overflows", entry.pubkey),
                    )
                })?;
            }
        }
    }
    Ok(table)
}

/// An additional staked validator created at genesis
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapAccount {
    /// Validator identity
    pub identity_pubkey: PublicKey,
    /// Vote account
    pub vote_pubkey: PublicKey,
    /// Stake account
    pub stake_pubkey: PublicKey,
    /// Identity balance; defaults to `flags.bootstrapValidatorLamports`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_lamports: Option<u64>,
    /// Delegated stake; defaults to `flags.bootstrapValidatorStakeLamports`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake_lamports: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ValidatorAccountRow {
    balance_lamports: u64,
    stake_lamports: u64,
    identity_account: String,
    vote_account: String,
    stake_account: String,
}

#[derive(Debug, Serialize)]
struct ValidatorAccountsFile {
    validator_accounts: Vec<ValidatorAccountRow>,
}

/// Resolve balances and order accounts by identity
fn validator_account_rows(
    flags: &GenesisFlags,
    accounts: &[BootstrapAccount],
) -> std::result::Result<Vec<ValidatorAccountRow>, (String, String)> {
    let mut rows = accounts
        .iter()
        .enumerate()
        .map(|(i, account)| {
            let balance_lamports = account
                .balance_lamports
                .or(flags.bootstrap_validator_lamports)
                .ok_or_else(|| {
                    (
                        format!("accounts[{i}].balanceLamports"),
                        "required unless flags.bootstrapValidatorLamports is set".to_string(),
                    )
                })?;
            let stake_lamports = account
                .stake_lamports
                .or(flags.bootstrap_validator_stake_lamports)
                .ok_or_else(|| {
                    (
                        format!("accounts[{i}].stakeLamports"),
                        "required unless flags.bootstrapValidatorStakeLamports is set".to_string(),
                    )
                })?;
            Ok(ValidatorAccountRow {
                balance_lamports,
                stake_lamports,
                identity_account: account.identity_pubkey.to_string(),
                vote_account: account.vote_pubkey.to_string(),
                stake_account: account.stake_pubkey.to_string(),
            })
        })
        .collect::<std::result::Result<Vec<_>, (String, String)>>()?;
    rows.sort_by(|a, b| a.identity_account.cmp(&b.identity_account));
    Ok(rows)
}

/// Flags passed to `solana-genesis`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisFlags {
    /// Ledger directory on the host
    pub ledger_path: String,
    /// Bootstrap validator identity
    pub identity_pubkey: PublicKey,
    /// Bootstrap validator vote account
    pub vote_pubkey: PublicKey,
    /// Bootstrap validator stake account
    pub stake_pubkey: PublicKey,
    /// Faucet account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faucet_pubkey: Option<PublicKey>,
    /// Authority over the bootstrap stake account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_stake_authorized_pubkey: Option<PublicKey>,
    /// Lamports for the bootstrap identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_validator_lamports: Option<u64>,
    /// Lamports delegated to the bootstrap stake account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_validator_stake_lamports: Option<u64>,
    /// `development`, `devnet`, `testnet` or `mainnet-beta`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,
    /// RFC 3339 creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    /// Feature ids to leave inactive
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deactivate_features: Vec<String>,
    /// Enable epoch warmup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_warmup_epochs: Option<bool>,
    /// Lamports for the faucet account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faucet_lamports: Option<u64>,
    /// Percentage of fees to burn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_burn_percentage: Option<u8>,
    /// `auto`, `sleep` or a number
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub hashes_per_tick: Option<String>,
    /// Inflation schedule name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inflation: Option<String>,
    /// Rent rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lamports_per_byte_year: Option<u64>,
    /// Maximum unpacked genesis archive size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_genesis_archive_unpacked_size: Option<u64>,
    /// Percentage of collected rent to burn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent_burn_percentage: Option<u8>,
    /// Rent exemption threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent_exemption_threshold: Option<u64>,
    /// Epoch length in slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots_per_epoch: Option<u64>,
    /// Target fee per signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lamports_per_signature: Option<u64>,
    /// Target signatures per slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_signatures_per_slot: Option<u64>,
    /// Microseconds per PoH tick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tick_duration: Option<u64>,
    /// PoH ticks per slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticks_per_slot: Option<u64>,
    /// Cluster RPC URL used to clone features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Vote account commission percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_commission_percentage: Option<u8>,
    /// Passed through after every other flag
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_flags: Vec<String>,
}

impl GenesisFlags {
    /// `solana-genesis` arguments in a fixed order
    pub fn args(&self, with_validator_accounts: bool) -> FlagBuilder {
        let mut b = FlagBuilder::new();
        b.append("primordial-accounts-file", PRIMORDIAL_PATH).append_multi(
            "bootstrap-validator",
            &[self.identity_pubkey, self.vote_pubkey, self.stake_pubkey],
        );
        if with_validator_accounts {
            b.append("validator-accounts-file", VALIDATOR_ACCOUNTS_PATH);
        }
        b.append("ledger", &self.ledger_path)
            .append_opt("bootstrap-stake-authorized-pubkey", self.bootstrap_stake_authorized_pubkey)
            .append_opt("bootstrap-validator-lamports", self.bootstrap_validator_lamports)
            .append_opt(
                "bootstrap-validator-stake-lamports",
                self.bootstrap_validator_stake_lamports,
            )
            .append_opt("cluster-type", self.cluster_type.as_ref())
            .append(
                "creation-time",
                self.creation_time.as_deref().unwrap_or(DEFAULT_CREATION_TIME),
            )
            .append_list("deactivate-feature", &self.deactivate_features)
            .append_bool("enable-warmup-epochs", self.enable_warmup_epochs)
            .append_opt("faucet-pubkey", self.faucet_pubkey)
            .append_opt("faucet-lamports", self.faucet_lamports)
            .append_opt("fee-burn-percentage", self.fee_burn_percentage)
            .append_opt("hashes-per-tick", self.hashes_per_tick.as_ref())
            .append_opt("inflation", self.inflation.as_ref())
            .append_opt("lamports-per-byte-year", self.lamports_per_byte_year)
            .append_opt(
                "max-genesis-archive-unpacked-size",
                self.max_genesis_archive_unpacked_size,
            )
            .append_opt("rent-burn-percentage", self.rent_burn_percentage)
            .append_opt("rent-exemption-threshold", self.rent_exemption_threshold)
            .append_opt("slots-per-epoch", self.slots_per_epoch)
            .append_opt("target-lamports-per-signature", self.target_lamports_per_signature)
            .append_opt("target-signatures-per-slot", self.target_signatures_per_slot)
            .append_opt("target-tick-duration", self.target_tick_duration)
            .append_opt("ticks-per-slot", self.ticks_per_slot)
            .append_opt("url", self.url.as_ref())
            .append_opt("vote-commission-percentage", self.vote_commission_percentage)
            .extend_raw(self.extra_flags.iter().cloned());
        b
    }

    fn percentages(&self) -> [(&'static str, Option<u8>); 3] {
        [
            ("flags.feeBurnPercentage", self.fee_burn_percentage),
            ("flags.rentBurnPercentage", self.rent_burn_percentage),
            ("flags.voteCommissionPercentage", self.vote_commission_percentage),
        ]
    }
}

/// Inputs of a genesis resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisArgs {
    /// Bootstrap host
    pub connection: Connection,
    /// `solana-genesis` flags
    pub flags: GenesisFlags,
    /// Pre-funded accounts
    #[serde(default)]
    pub primordial: Vec<PrimordialEntry>,
    /// Staked validators besides the bootstrap validator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<BootstrapAccount>,
    /// Package version to install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Ledger handling on delete
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

impl GenesisArgs {
    /// Reject inputs `solana-genesis` would fail on, before touching the host
    pub fn validate(&self, id: &str) -> Result<()> {
        self.connection.validate()?;

        if !self.flags.ledger_path.starts_with('/') {
            return Err(Error::validation_for_field(
                id,
                "flags.ledgerPath",
                format!("must be an absolute path, got {:?}", self.flags.ledger_path),
            ));
        }

        if let Some(value) = &self.flags.hashes_per_tick {
            let valid = matches!(value.as_str(), "auto" | "sleep") || value.parse::<u64>().is_ok();
            if !valid {
                return Err(Error::validation_for_field(
                    id,
                    "flags.hashesPerTick",
                    format!("invalid value {value:?}; must be 'auto', 'sleep' or a number"),
                ));
            }
        }

        for (field, value) in self.flags.percentages() {
            if let Some(value) = value.filter(|v| *v > 100) {
                return Err(Error::validation_for_field(
                    id,
                    field,
                    format!("{value} is not a percentage"),
                ));
            }
        }

        let tagged = |(field, msg): (String, String)| Error::validation_for_field(id, field, msg);
        primordial_table(&self.primordial).map_err(tagged)?;
        validator_account_rows(&self.flags, &self.accounts).map_err(tagged)?;
        Ok(())
    }
}

/// Outputs of a genesis resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisOutputs {
    /// Hash of the ledger's genesis config, as validators expect it
    pub genesis_hash: String,
    /// Content digest of the genesis configuration
    pub config_digest: String,
    /// Ledger directory on the host
    pub ledger_path: String,
}

/// Everything needed to build the ledger remotely
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedGenesis {
    /// `solana-genesis` arguments
    pub args: FlagBuilder,
    /// Contents of the primordial accounts file
    pub primordial_yaml: String,
    /// Contents of the validator accounts file, when there are extra validators
    pub validator_accounts_yaml: Option<String>,
    /// Content digest over args and account tables
    pub config_digest: String,
}

/// Render the account tables and argument list and compute the digest
pub fn render(
    flags: &GenesisFlags,
    primordial: &[PrimordialEntry],
    accounts: &[BootstrapAccount],
) -> Result<RenderedGenesis> {
    let untagged = |(field, msg): (String, String)| Error::validation(format!("{field}: {msg}"));

    let primordial_yaml = serde_yaml::to_string(&primordial_table(primordial).map_err(untagged)?)?;
    let validator_accounts_yaml = if accounts.is_empty() {
        None
    } else {
        let rows = validator_account_rows(flags, accounts).map_err(untagged)?;
        Some(serde_yaml::to_string(&ValidatorAccountsFile {
            validator_accounts: rows,
        })?)
    };

    let args = flags.args(validator_accounts_yaml.is_some());
    let config_digest = compute_config_digest(
        args.args(),
        &primordial_yaml,
        validator_accounts_yaml.as_deref(),
    );

    Ok(RenderedGenesis {
        args,
        primordial_yaml,
        validator_accounts_yaml,
        config_digest,
    })
}

/// SHA-256 over the argument list and the canonical account tables, in base58
pub fn compute_config_digest(args: &[String], primordial_yaml: &str, validator_accounts_yaml: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    for arg in args {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(b"\n--\n");
    hasher.update(primordial_yaml.as_bytes());
    if let Some(accounts) = validator_accounts_yaml {
        hasher.update(b"\n--\n");
        hasher.update(accounts.as_bytes());
    }
    bs58::encode(hasher.finalize()).into_string()
}

fn packages(version: Option<&str>) -> Vec<String> {
    let pinned = |name: &str| match version {
        Some(v) => format!("{name}={v}"),
        None => name.to_string(),
    };
    vec![
        "bzip2".to_string(),
        pinned("svmkit-solana-genesis"),
        pinned("svmkit-solana-cli"),
        pinned("svmkit-agave-ledger-tool"),
    ]
}

fn staged_paths(rendered: &RenderedGenesis) -> Vec<&'static str> {
    let mut paths = vec![PRIMORDIAL_PATH];
    if rendered.validator_accounts_yaml.is_some() {
        paths.push(VALIDATOR_ACCOUNTS_PATH);
    }
    paths
}

/// Build the create script for rendered genesis inputs
pub fn create_script(engine: &TemplateEngine, args: &GenesisArgs, rendered: &RenderedGenesis) -> Result<Script> {
    let body = engine.render(
        &CREATE_TEMPLATE,
        serde_json::json!({
            "flags": rendered.args.to_shell(),
            "packages": packages(args.version.as_deref()),
            "staged_paths": staged_paths(rendered),
            "overwrite": args.deletion_policy.overwrites_existing(),
            "incompatible_status": INCOMPATIBLE_LEDGER_STATUS,
        }),
    )?;

    let mut script = Script::new("solana-genesis", body)
        .with_env("LEDGER_PATH", &args.flags.ledger_path)
        .with_env("CONFIG_DIGEST", &rendered.config_digest)
        .with_file(PayloadFile::new(PRIMORDIAL_PATH, &rendered.primordial_yaml, 0o644));
    if let Some(accounts) = &rendered.validator_accounts_yaml {
        script = script.with_file(PayloadFile::new(VALIDATOR_ACCOUNTS_PATH, accounts, 0o644));
    }
    Ok(script.with_check(
        r#"test -f "$LEDGER_PATH/genesis.bin" && test "$(cat "$LEDGER_PATH/.svmkit-genesis" 2>/dev/null)" = "$CONFIG_DIGEST""#,
    ))
}

/// Build the delete script for a ledger under the given policy
pub fn delete_script(engine: &TemplateEngine, args: &GenesisArgs) -> Result<Script> {
    let body = engine.render(
        &DELETE_TEMPLATE,
        serde_json::json!({
            "staged_paths": [PRIMORDIAL_PATH, VALIDATOR_ACCOUNTS_PATH],
            "remove_ledger": args.deletion_policy.removes_files(),
        }),
    )?;
    Ok(Script::new("genesis-delete", body).with_env("LEDGER_PATH", &args.flags.ledger_path))
}

/// Read the genesis hash recorded when the ledger was built
pub fn hash_script(ledger_path: &str) -> Script {
    Script::new("genesis-hash", r#"cat "$LEDGER_PATH/.svmkit-genesis-hash""#)
        .with_env("LEDGER_PATH", ledger_path)
}

/// The base58 hash on the last line of `agave-ledger-tool genesis-hash` output
pub fn parse_genesis_hash(ledger_path: &str, stdout: &str) -> Result<String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or_default();
    match bs58::decode(line).into_vec() {
        Ok(bytes) if bytes.len() == 32 => Ok(line.to_string()),
        _ => Err(Error::genesis(format!(
            "ledger at {ledger_path} reported {line:?}, which is not a genesis hash"
        ))),
    }
}

fn map_remote_error(ledger_path: &str, err: Error) -> Error {
    match err {
        Error::Execution {
            exit_status: INCOMPATIBLE_LEDGER_STATUS,
            stderr,
            ..
        } => Error::genesis(format!("incompatible ledger at {ledger_path}: {stderr}")),
        Error::Execution {
            exit_status,
            stderr,
            host,
            command,
        } => Error::genesis(format!("{command} on {host} exited with {exit_status}: {stderr}")),
        other => other,
    }
}

/// Lifecycle for `svm:genesis:Solana`
pub struct GenesisResource;

#[async_trait]
impl Resource for GenesisResource {
    fn type_token(&self) -> &'static str {
        GENESIS_TYPE
    }

    fn check(&self, _ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<()> {
        parse_inputs::<GenesisArgs>(id, inputs)?.validate(id)
    }

    fn diff(&self, _id: &str, _old: &Value, _new: &Value) -> Result<DiffKind> {
        Ok(DiffKind::Replace)
    }

    #[instrument(skip_all, fields(node = %id))]
    async fn create(&self, ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<Value> {
        let args: GenesisArgs = parse_inputs(id, inputs)?;
        args.validate(id)?;
        let ledger_path = &args.flags.ledger_path;

        let rendered = render(&args.flags, &args.primordial, &args.accounts)?;
        let script = create_script(ctx.templates(), &args, &rendered)?;

        let session = ctx.session(&args.connection).await?;
        let result = session
            .run(&script)
            .await
            .map_err(|e| map_remote_error(ledger_path, e))?;
        let recorded = session
            .run(&hash_script(ledger_path))
            .await
            .map_err(|e| map_remote_error(ledger_path, e))?;
        let genesis_hash = parse_genesis_hash(ledger_path, &recorded.stdout)?;

        info!(
            genesis_hash = %genesis_hash,
            config_digest = %rendered.config_digest,
            already_present = result.satisfied,
            "genesis ledger ready"
        );
        to_outputs(
            GENESIS_TYPE,
            &GenesisOutputs {
                genesis_hash,
                config_digest: rendered.config_digest,
                ledger_path: args.flags.ledger_path.clone(),
            },
        )
    }

    async fn update(
        &self,
        ctx: &ApplyContext,
        id: &str,
        _old_outputs: &Value,
        inputs: &Value,
    ) -> Result<Value> {
        // diff never asks for an update; rebuilding is the only safe answer
        self.create(ctx, id, inputs).await
    }

    #[instrument(skip_all, fields(node = %id))]
    async fn delete(&self, ctx: &ApplyContext, id: &str, inputs: &Value, _outputs: &Value) -> Result<()> {
        let args: GenesisArgs = parse_inputs(id, inputs)?;
        let script = delete_script(ctx.templates(), &args)?;

        ctx.session(&args.connection).await?.run(&script).await?;
        info!(policy = ?args.deletion_policy, "genesis removed");
        Ok(())
    }
}
