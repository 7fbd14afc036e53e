#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use alloy::primitives::Address;
use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use secrecy::SecretString;
use std::io::Write as _;
use tracing_subscriber::prelude::*;

mod amount;
mod borrow_math;
mod chains;
mod cli_output;
mod config;
mod contracts;
mod errors;
mod orchestrator;
mod paths;
mod pipeline;
mod retry;
mod store;
mod types;

use crate::{
    chains::{evm::EvmClient, ChainClient as _},
    config::PipelineConfig,
    contracts::ContractSet,
    orchestrator::{Orchestrator, RunContext},
    pipeline::{Pipeline, PipelinePlan, Step, Targets},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliStep {
    Wrap,
    Approve,
    Supply,
    Snapshot,
}

impl From<CliStep> for Step {
    fn from(v: CliStep) -> Self {
        match v {
            CliStep::Wrap => Self::Wrap,
            CliStep::Approve => Self::Approve,
            CliStep::Supply => Self::Supply,
            CliStep::Snapshot => Self::Snapshot,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "aave-pipeline", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wrap, approve and supply collateral, then compute how much can be borrowed.
    ///
    /// Prints a JSON report to stdout and a summary to stderr. Exits non-zero if a step fails.
    Run {
        /// Network from the config file (defaults to `default_network`).
        #[arg(long)]
        network: Option<String>,

        /// Native amount to wrap and supply, e.g. `0.02`.
        #[arg(long)]
        amount: Option<String>,

        /// Skip the writes before this step (resume after a partial run).
        #[arg(long = "from", value_enum, default_value_t = CliStep::Wrap)]
        from: CliStep,
    },

    /// Print the lending-pool account snapshot.
    Snapshot {
        #[arg(long)]
        network: Option<String>,

        /// Account to inspect instead of the signing account.
        #[arg(long)]
        account: Option<Address>,
    },

    /// Print the latest borrow-asset price quote and its inverse.
    Quote {
        #[arg(long)]
        network: Option<String>,
    },

    /// Print the effective configuration (contains no secrets).
    Config,

    /// Print resolved paths.
    Paths,
}

fn init_logging(paths: &paths::PipelinePaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("aave-pipeline.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn print_json(v: &impl serde::Serialize, what: &str) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).with_context(|| format!("serialize {what}"))?;
    writeln!(std::io::stdout().lock(), "{s}").with_context(|| format!("write {what}"))?;
    Ok(())
}

fn private_key_from_env() -> Option<SecretString> {
    std::env::var("AAVE_PIPELINE_PRIVATE_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| SecretString::new(s.into()))
}

/// Everything a chain-facing command needs, built from config for one network.
struct Session {
    network: String,
    orch: Orchestrator<EvmClient>,
    ctx: RunContext,
    contracts: ContractSet,
}

impl Session {
    fn open(cfg: &PipelineConfig, network: Option<&str>) -> eyre::Result<Self> {
        let network = network.unwrap_or(cfg.default_network.as_str()).trim().to_owned();
        let net = cfg.network(&network)?;
        let contracts = ContractSet::resolve(&network, &net.contracts)?;
        let signer = chains::evm::load_signer(net.chain_id, private_key_from_env().as_ref())?;
        let client = EvmClient::new(&network, net, signer, cfg.pipeline.poll_interval());
        let ctx = RunContext::new(client.current_account(), net, &cfg.pipeline);
        tracing::debug!(network = %network, chain_id = net.chain_id, account = %ctx.account, "session opened");
        Ok(Self {
            network,
            orch: Orchestrator::new(client),
            ctx,
            contracts,
        })
    }
}

async fn cmd_run(
    cfg: &PipelineConfig,
    network: Option<&str>,
    amount: Option<&str>,
    from: Step,
) -> eyre::Result<()> {
    let s = Session::open(cfg, network)?;
    let amount_str = amount.unwrap_or(cfg.pipeline.amount.as_str());
    let amount = amount::parse_units(amount_str, orchestrator::WRAPPED_NATIVE_DECIMALS)
        .with_context(|| format!("parse amount '{amount_str}'"))?;
    let targets = Targets::resolve(&s.orch, &s.contracts).await?;
    let started_at = chrono::Utc::now();

    let plan = PipelinePlan::new(amount).starting_at(from);
    let res = Pipeline::new(&s.orch, &s.ctx, &targets).run(&plan).await;
    let finished_at = chrono::Utc::now();

    match res {
        Ok(out) => {
            print_json(
                &serde_json::json!({
                    "ok": true,
                    "network": s.network,
                    "started_at": started_at.to_rfc3339(),
                    "finished_at": finished_at.to_rfc3339(),
                    "report": out,
                }),
                "run report",
            )?;
            cli_output::print_run_summary(&s.network, &out);
            Ok(())
        }
        Err(aborted) => {
            print_json(
                &serde_json::json!({
                    "ok": false,
                    "network": s.network,
                    "started_at": started_at.to_rfc3339(),
                    "finished_at": finished_at.to_rfc3339(),
                    "report": aborted.report(),
                }),
                "abort report",
            )?;
            cli_output::print_abort_summary(&s.network, &aborted);
            Err(eyre::Report::new(aborted)).context("pipeline aborted")
        }
    }
}

async fn cmd_snapshot(
    cfg: &PipelineConfig,
    network: Option<&str>,
    account: Option<Address>,
) -> eyre::Result<()> {
    let s = Session::open(cfg, network)?;
    let ctx = RunContext {
        account: account.unwrap_or(s.ctx.account),
        ..s.ctx.clone()
    };
    let pool = s
        .orch
        .resolve_lending_pool(s.contracts.lending_pool_addresses_provider)
        .await?;
    let snap = s.orch.get_account_snapshot(&ctx, pool).await?;
    let native = s.orch.native_balance(&ctx).await?;
    let wrapped = s.orch.wrapped_balance(&ctx, s.contracts.weth).await?;
    let allowance = s.orch.allowance(&ctx, s.contracts.weth, pool).await?;
    print_json(
        &serde_json::json!({
            "network": s.network,
            "account": ctx.account,
            "pool": pool,
            "native_balance": native.to_string(),
            "weth_balance": wrapped,
            "weth_allowance_to_pool": allowance.to_string(),
            "snapshot": snap,
        }),
        "snapshot",
    )?;
    cli_output::print_snapshot(&snap, &wrapped);
    Ok(())
}

async fn cmd_quote(cfg: &PipelineConfig, network: Option<&str>) -> eyre::Result<()> {
    let s = Session::open(cfg, network)?;
    let quote = s.orch.get_price_quote(&s.ctx, s.contracts.price_feed).await?;
    let per_native = borrow_math::invert_price(&quote, s.contracts.borrow_asset_decimals)?;
    print_json(
        &serde_json::json!({ "network": s.network, "quote": quote, "per_native": per_native }),
        "quote",
    )?;
    cli_output::print_quote(&quote, &per_native);
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = paths::PipelinePaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Paths => print_json(
            &serde_json::json!({
              "config_dir": paths.config_dir,
              "config_file": paths.config_file(),
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }),
            "paths",
        ),
        Command::Config => {
            let cfg = store::ConfigStore::new(&paths).load_or_init_default()?;
            print_json(&cfg, "config")
        }
        Command::Run {
            network,
            amount,
            from,
        } => {
            let cfg = store::ConfigStore::new(&paths).load_or_init_default()?;
            cmd_run(&cfg, network.as_deref(), amount.as_deref(), from.into()).await
        }
        Command::Snapshot { network, account } => {
            let cfg = store::ConfigStore::new(&paths).load_or_init_default()?;
            cmd_snapshot(&cfg, network.as_deref(), account)
                .await
                .context("snapshot failed")
        }
        Command::Quote { network } => {
            let cfg = store::ConfigStore::new(&paths).load_or_init_default()?;
            cmd_quote(&cfg, network.as_deref())
                .await
                .context("quote failed")
        }
    }
}
