//! svmkit - apply, inspect and tear down validator cluster stacks

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use svmkit::graph::{EvaluationReport, Evaluator, StackState};
use svmkit::resource::{ApplyContext, ResourceRegistry};
use svmkit::retry::RetryConfig;
use svmkit::ssh::{SshTransport, TransportConfig};
use svmkit::stack::Stack;

/// svmkit - provision Solana validator clusters over SSH
#[derive(Parser, Debug)]
#[command(name = "svmkit", version, about, long_about = None)]
struct Cli {
    /// Stack document to evaluate
    #[arg(short = 'f', long, env = "SVMKIT_STACK", default_value = "svmkit.yaml", global = true)]
    stack: PathBuf,

    /// State file holding the results of the last evaluation
    #[arg(long, env = "SVMKIT_STATE", default_value = "svmkit.state.json", global = true)]
    state: PathBuf,

    /// Upper bound on a single remote command, in seconds
    #[arg(long, env = "SVMKIT_COMMAND_TIMEOUT_SECS", default_value = "600", global = true)]
    command_timeout_secs: u64,

    /// Path to the ssh client
    #[arg(long, env = "SVMKIT_SSH", default_value = "ssh", global = true)]
    ssh: PathBuf,

    /// Verify host keys against known_hosts
    #[arg(long, global = true)]
    strict_host_key_checking: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update every resource in the stack
    ///
    /// Resources whose inputs are unchanged since the last run are left
    /// alone; resources removed from the stack are deleted.
    Up,

    /// Delete every resource recorded in the state file
    Destroy,

    /// Print the resource graph in apply order
    Graph,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up => run_up(&cli).await,
        Commands::Destroy => run_destroy(&cli).await,
        Commands::Graph => run_graph(&cli),
    }
}

fn evaluator(cli: &Cli) -> Evaluator {
    let transport = SshTransport::new(TransportConfig {
        ssh_program: cli.ssh.clone(),
        command_timeout: Duration::from_secs(cli.command_timeout_secs),
        strict_host_key_checking: cli.strict_host_key_checking,
        ..Default::default()
    });
    let ctx = ApplyContext::new(Arc::new(transport), RetryConfig::default());
    Evaluator::new(ResourceRegistry::builtin(), ctx)
}

/// Cancel pending work on the first Ctrl-C; in-flight resources finish
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, waiting for in-flight resources to finish");
            token.cancel();
        }
    });
    cancel
}

async fn run_up(cli: &Cli) -> anyhow::Result<()> {
    let stack = Stack::load(&cli.stack)?;
    let graph = stack.graph()?;
    let prior = StackState::load(&cli.state)?;

    tracing::info!(
        stack = stack.name.as_deref().unwrap_or("-"),
        resources = graph.len(),
        "evaluating stack"
    );

    let cancel = cancel_on_ctrl_c();
    let report = evaluator(cli).evaluate(&graph, &prior, &cancel).await?;
    report.state().save(&cli.state)?;
    finish(cli, &report)
}

async fn run_destroy(cli: &Cli) -> anyhow::Result<()> {
    let prior = StackState::load(&cli.state)?;
    if prior.is_empty() {
        println!("nothing to destroy");
        return Ok(());
    }

    let cancel = cancel_on_ctrl_c();
    let report = evaluator(cli).destroy(&prior, &cancel).await;
    report.state().save(&cli.state)?;
    finish(cli, &report)
}

fn run_graph(cli: &Cli) -> anyhow::Result<()> {
    let graph = Stack::load(&cli.stack)?.graph()?;
    for id in graph.topological_order() {
        let Some(node) = graph.get(&id) else { continue };
        let deps: Vec<&str> = node.dependencies().iter().map(String::as_str).collect();
        if deps.is_empty() {
            println!("{id} ({})", node.type_token());
        } else {
            println!("{id} ({}) <- {}", node.type_token(), deps.join(", "));
        }
    }
    Ok(())
}

fn finish(cli: &Cli, report: &EvaluationReport) -> anyhow::Result<()> {
    if cli.json {
        let nodes: Vec<_> = report.nodes().collect();
        println!("{}", serde_json::to_string_pretty(&nodes)?);
    } else {
        for node in report.nodes() {
            let operation = node
                .operation
                .map(|op| op.to_string())
                .unwrap_or_else(|| "-".to_string());
            match &node.error {
                Some(error) => println!("{:<24} {:<10} {:<8} {}", node.id, node.state.to_string(), operation, error),
                None => println!("{:<24} {:<10} {}", node.id, node.state.to_string(), operation),
            }
        }
    }

    let failures = report.failures();
    if !failures.is_empty() {
        anyhow::bail!("{} resource(s) did not complete", failures.len());
    }
    Ok(())
}
