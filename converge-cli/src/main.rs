//! converge: drive create/update/delete reconciliations from a shell.
//!
//! Runs the engine's lifecycle orchestrator against an in-process simulated
//! control plane, prints the reconciliation report, and exits non-zero
//! unless the reconciliation succeeded. Also exposes the composite identity
//! codec.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use converge_engine::identity;
use converge_engine::{Change, EngineConfig, Outcome, Reconciliation, ResourceId, StateSet};
use tabled::{Table, Tabled};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod sim;

use sim::{Knobs, SimulatedIndex};

/// Number of components in a search index identity.
const INDEX_ID_PARTS: usize = 3;

#[derive(Parser)]
#[command(name = "converge", version)]
#[command(about = "Reconcile resources against a simulated eventually consistent control plane")]
struct Cli {
    /// Engine configuration file (JSON); flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log engine decisions at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a search index and wait until it is running
    Create {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        sim: SimArgs,
    },

    /// Update a search index and wait until it is running again
    Update {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        sim: SimArgs,

        /// No mutable field changed: skip the update call, only converge
        #[arg(long)]
        unchanged: bool,
    },

    /// Delete a search index and wait until it is gone
    Delete {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        sim: SimArgs,
    },

    /// Composite identity codec
    Id {
        #[command(subcommand)]
        command: IdCommand,
    },

    /// Print the effective engine configuration as JSON
    Config {
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Subcommand)]
enum IdCommand {
    /// Join components into one identity string
    Encode {
        #[arg(required = true)]
        parts: Vec<String>,
    },

    /// Split an identity string into its components
    Decode {
        id: String,

        /// Expected number of components
        #[arg(short = 'n', long, default_value_t = INDEX_ID_PARTS)]
        count: usize,
    },
}

#[derive(Args)]
struct Target {
    /// Instance name
    #[arg(long, default_value = "demo")]
    instance: String,

    /// Table name
    #[arg(long, default_value = "orders")]
    table: String,

    /// Index name
    #[arg(long, default_value = "orders_index")]
    index: String,
}

#[derive(Args)]
struct EngineArgs {
    /// First retry delay in milliseconds
    #[arg(long)]
    base_ms: Option<u64>,

    /// Backoff growth factor
    #[arg(long)]
    growth: Option<f64>,

    /// Backoff jitter fraction (0.0-1.0)
    #[arg(long)]
    jitter: Option<f64>,

    /// Upper bound for a single retry delay in milliseconds
    #[arg(long)]
    max_ms: Option<u64>,

    /// Poll interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Delay before the first poll in milliseconds
    #[arg(long)]
    initial_delay_ms: Option<u64>,

    /// Consecutive absent observations tolerated while creating (0 = unlimited)
    #[arg(long)]
    not_found_checks: Option<u32>,

    /// Consecutive target observations required before success
    #[arg(long)]
    target_occurrence: Option<u32>,

    /// Overall budget for this operation in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args)]
struct SimArgs {
    /// Throttling responses before a mutating call is accepted
    #[arg(long, default_value_t = 1)]
    throttles: u32,

    /// Describe calls that still report the transitional state
    #[arg(long, default_value_t = 2)]
    settle_polls: u32,

    /// Terminal state reported instead of the normal end state
    #[arg(long)]
    fail_state: Option<String>,

    /// Simulated round-trip time per call in milliseconds
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Pretend the index does not exist yet (update/delete)
    #[arg(long)]
    absent: bool,
}

#[derive(Clone, Copy)]
enum Kind {
    Create,
    Update,
    Delete,
}

impl EngineArgs {
    /// Apply explicit flags on top of `config`.
    fn apply(&self, config: &mut EngineConfig, kind: Option<Kind>) {
        let b = &mut config.backoff;
        if let Some(v) = self.base_ms {
            b.base_ms = v;
        }
        if let Some(v) = self.growth {
            b.growth = v;
        }
        if let Some(v) = self.jitter {
            b.jitter = v;
        }
        if let Some(v) = self.max_ms {
            b.max_ms = v;
        }

        let p = &mut config.poll;
        if let Some(v) = self.interval_ms {
            p.interval_ms = v;
        }
        if let Some(v) = self.initial_delay_ms {
            p.initial_delay_ms = v;
        }
        if let Some(v) = self.not_found_checks {
            p.not_found_checks = v;
        }
        if let Some(v) = self.target_occurrence {
            p.continuous_target_occurrence = v;
        }

        if let Some(secs) = self.timeout_secs {
            let t = &mut config.timeouts;
            match kind {
                Some(Kind::Create) => t.create_secs = secs,
                Some(Kind::Update) => t.update_secs = secs,
                Some(Kind::Delete) => t.delete_secs = secs,
                None => {
                    t.create_secs = secs;
                    t.update_secs = secs;
                    t.delete_secs = secs;
                }
            }
        }
    }
}

impl SimArgs {
    fn knobs(&self, exists: bool) -> Knobs {
        Knobs {
            throttles: self.throttles,
            settle_polls: self.settle_polls,
            fail_state: self.fail_state.clone(),
            latency: Duration::from_millis(self.latency_ms),
            exists: exists && !self.absent,
        }
    }

    fn fail_states(&self, builtin: &str) -> Vec<String> {
        let mut states = vec![builtin.to_string()];
        states.extend(self.fail_state.iter().cloned());
        states
    }
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "OPERATION")]
    operation: String,
    #[tabled(rename = "IDENTITY")]
    identity: String,
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: usize,
    #[tabled(rename = "PROBES")]
    probes: u32,
    #[tabled(rename = "ELAPSED")]
    elapsed: String,
}

impl From<&Reconciliation> for ReportRow {
    fn from(report: &Reconciliation) -> Self {
        let state = match &report.outcome {
            Outcome::Succeeded(state) => state.clone(),
            Outcome::TimedOut { last_state, .. } => last_state.clone(),
            _ => None,
        };
        Self {
            operation: report.operation.to_string(),
            identity: report
                .identity
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
            phase: report.phase.to_string(),
            outcome: report.outcome.label().to_string(),
            state: state.unwrap_or_else(|| "-".to_string()),
            attempts: report.attempts.len(),
            probes: report.probes,
            elapsed: format_elapsed(report.elapsed),
        }
    }
}

#[derive(Tabled)]
struct AttemptRow {
    #[tabled(rename = "#")]
    number: u32,
    #[tabled(rename = "AT")]
    at: String,
    #[tabled(rename = "RESULT")]
    result: String,
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

fn print_report(report: &Reconciliation) {
    println!("{}", Table::new([ReportRow::from(report)]));
    if report.attempts.is_empty() {
        return;
    }
    let rows: Vec<AttemptRow> = report
        .attempts
        .iter()
        .map(|a| AttemptRow {
            number: a.number,
            at: a.at.format("%H:%M:%S%.3f").to_string(),
            result: a
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "ok".to_string()),
        })
        .collect();
    println!("{}", Table::new(rows));
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "converge=debug,converge_engine=debug,audit=info"
    } else {
        "converge=info,converge_engine=info,audit=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn reconcile(
    kind: Kind,
    config: EngineConfig,
    target: Target,
    sim: SimArgs,
    change: Change,
) -> Result<Reconciliation> {
    let settings = config.validate().context("Invalid engine configuration")?;
    let orchestrator = settings.orchestrator();
    let id = ResourceId::new([&target.instance, &target.table, &target.index])
        .context("Invalid index name")?;

    let index = SimulatedIndex::new(
        target.instance,
        target.table,
        target.index,
        sim.knobs(!matches!(kind, Kind::Create)),
    );

    let report = match kind {
        Kind::Create => {
            let states = StateSet::new()
                .pending(["Creating"])
                .target(["Running"])
                .fail(sim.fail_states("CreateFailed"));
            info!(identity = %id, "Creating search index");
            orchestrator
                .create(&index, &states, settings.timeouts.create)
                .await
        }
        Kind::Update => {
            let states = StateSet::new()
                .pending(["Updating"])
                .target(["Running"])
                .fail(sim.fail_states("UpdateFailed"));
            info!(identity = %id, "Updating search index");
            orchestrator
                .update(&index, &id, change, &states, settings.timeouts.update)
                .await
        }
        Kind::Delete => {
            let states = StateSet::absent()
                .pending(["Deleting"])
                .fail(sim.fail_states("DeleteFailed"));
            info!(identity = %id, "Deleting search index");
            orchestrator
                .delete(&index, &id, &states, settings.timeouts.delete)
                .await
        }
    };

    if let Some(recorded) = index.recorded() {
        info!(identity = %recorded, "Identity recorded");
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (kind, target, engine, sim, change) = match cli.command {
        Commands::Id { command } => {
            run_id(command)?;
            return Ok(());
        }
        Commands::Config { engine } => {
            let mut config = load_config(cli.config.as_ref())?;
            engine.apply(&mut config, None);
            config.validate().context("Invalid engine configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Create {
            target,
            engine,
            sim,
        } => (Kind::Create, target, engine, sim, Change::Modified),
        Commands::Update {
            target,
            engine,
            sim,
            unchanged,
        } => {
            let change = if unchanged {
                Change::Unchanged
            } else {
                Change::Modified
            };
            (Kind::Update, target, engine, sim, change)
        }
        Commands::Delete {
            target,
            engine,
            sim,
        } => (Kind::Delete, target, engine, sim, Change::Modified),
    };

    let mut config = load_config(cli.config.as_ref())?;
    engine.apply(&mut config, Some(kind));

    let report = reconcile(kind, config, target, sim, change).await?;
    print_report(&report);

    if let Err(e) = report.into_result() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run_id(command: IdCommand) -> Result<()> {
    match command {
        IdCommand::Encode { parts } => {
            let id = identity::encode(&parts).context("Cannot encode identity")?;
            println!("{}", id);
        }
        IdCommand::Decode { id, count } => {
            let parts = identity::decode(&id, count).context("Cannot decode identity")?;
            for part in parts {
                println!("{}", part);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_args() -> EngineArgs {
        EngineArgs {
            base_ms: None,
            growth: None,
            jitter: None,
            max_ms: None,
            interval_ms: None,
            initial_delay_ms: None,
            not_found_checks: None,
            target_occurrence: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = EngineConfig::default();
        config.backoff.base_ms = 250;
        let args = EngineArgs {
            interval_ms: Some(100),
            timeout_secs: Some(5),
            ..engine_args()
        };
        args.apply(&mut config, Some(Kind::Delete));

        assert_eq!(config.backoff.base_ms, 250);
        assert_eq!(config.poll.interval_ms, 100);
        assert_eq!(config.timeouts.delete_secs, 5);
        assert_eq!(config.timeouts.create_secs, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_against_simulator() {
        let config = {
            let mut config = EngineConfig::default();
            EngineArgs {
                base_ms: Some(100),
                jitter: Some(0.0),
                interval_ms: Some(200),
                ..engine_args()
            }
            .apply(&mut config, Some(Kind::Create));
            config
        };
        let sim = SimArgs {
            throttles: 2,
            settle_polls: 1,
            fail_state: None,
            latency_ms: 0,
            absent: false,
        };
        let target = Target {
            instance: "demo".into(),
            table: "orders".into(),
            index: "orders_index".into(),
        };

        let report = reconcile(Kind::Create, config, target, sim, Change::Modified)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.probes, 2);
        assert_eq!(
            report.identity.map(|id| id.encode()),
            Some("demo:orders:orders_index".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_reports_fail_state() {
        let mut config = EngineConfig::default();
        EngineArgs {
            interval_ms: Some(100),
            ..engine_args()
        }
        .apply(&mut config, Some(Kind::Delete));
        let sim = SimArgs {
            throttles: 0,
            settle_polls: 0,
            fail_state: Some("DeleteFailed".into()),
            latency_ms: 0,
            absent: false,
        };
        let target = Target {
            instance: "demo".into(),
            table: "orders".into(),
            index: "orders_index".into(),
        };

        let report = reconcile(Kind::Delete, config, target, sim, Change::Modified)
            .await
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(report.outcome.label(), "failed-fast");
    }
}
