use anyhow::{bail, Context};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mpm::configuration::env::load_config_with_env;
use mpm::{
    output, Dispatcher, ErrorPolicy, MpmConfig, Operation, Outcome, ProcessExecutor, Registry,
    Request, SearchQuery, SelectionPolicy, Specifier, Status, WriteMode,
};

/// Exit code used when the user interrupts a running operation.
const INTERRUPTED: i32 = 130;

/// One interface for all the package managers on this machine.
#[derive(Parser)]
#[clap(author, version = clap::crate_version!(), max_term_width = 100, about)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Only use these managers (repeatable)
    #[clap(short, long = "manager", global = true, value_name = "ID")]
    managers: Vec<String>,

    /// Never use these managers (repeatable)
    #[clap(short = 'x', long, global = true, value_name = "ID")]
    exclude: Vec<String>,

    /// Ignore platform restrictions and deprecation
    #[clap(long, global = true)]
    all_managers: bool,

    /// Skip the remaining managers after the first failure
    #[clap(long, global = true)]
    stop_on_error: bool,

    /// Timeout for one package manager call, in seconds
    #[clap(short, long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Path to custom config file
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase logging level (-v: info, -vv: debug, -vvv: trace)
    #[clap(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the package managers found on this machine
    Managers,
    /// Lists installed packages
    Installed {
        /// Only show packages installed by more than one manager
        #[clap(short, long)]
        duplicates: bool,
    },
    /// Lists packages with a newer version available
    Outdated,
    /// Searches every manager for packages
    Search {
        query: String,

        /// Also match descriptions
        #[clap(short, long, conflicts_with = "exact")]
        extended: bool,

        /// Only exact id or name matches
        #[clap(long)]
        exact: bool,
    },
    /// Installs packages (`id`, `id@version` or `pkg:type/id@version`)
    Install {
        #[clap(required = true)]
        packages: Vec<String>,
    },
    /// Upgrades packages, or everything outdated when none are given
    Upgrade { packages: Vec<String> },
    /// Removes packages
    Remove {
        #[clap(required = true)]
        packages: Vec<String>,
    },
    /// Refreshes the managers' package indexes
    Sync,
    /// Removes caches and orphaned dependencies
    Cleanup,
    /// Writes installed packages to a TOML file
    Backup {
        path: PathBuf,

        /// What to do when the file already exists
        #[clap(long, value_enum, default_value = "forbid")]
        mode: WriteMode,
    },
    /// Installs every package listed in a backup file
    Restore { path: PathBuf },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn init_tracing(verbose: u8) -> anyhow::Result<()> {
    let log_level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Command-line flags win over the config file and `MPM_*` variables.
fn apply_cli_overrides(mut config: MpmConfig, cli: &Cli) -> anyhow::Result<MpmConfig> {
    if !cli.managers.is_empty() {
        config.include = cli.managers.iter().map(|m| m.to_lowercase()).collect();
    }
    if !cli.exclude.is_empty() {
        config.exclude = cli.exclude.iter().map(|m| m.to_lowercase()).collect();
    }
    if cli.all_managers {
        config.all_managers = true;
    }
    if cli.stop_on_error {
        config.stop_on_error = true;
    }
    if let Some(secs) = cli.timeout {
        config.timeout_secs = secs;
    }
    Ok(config.checked()?)
}

fn parse_specifiers(raw: &[String]) -> anyhow::Result<Vec<Specifier>> {
    raw.iter()
        .map(|s| Specifier::parse(s).with_context(|| format!("Invalid package '{s}'")))
        .collect()
}

/// Prints a listing and the outcome's errors.
fn show_listing(outcome: &Outcome, duplicates: bool) {
    if duplicates {
        let groups = outcome.packages.duplicates();
        if groups.is_empty() {
            output::info("No package is installed by more than one manager");
        } else {
            print!("{}", output::duplicates_table(&groups));
        }
    } else if outcome.packages.is_empty() {
        output::info("No packages");
    } else {
        print!("{}", output::package_table(&outcome.packages));
    }
    output::report(outcome);
}

/// Prints the packages a mutating operation acted on, and its errors.
fn show_changes(outcome: &Outcome) {
    for package in outcome.packages.iter() {
        output::success(&format!("{} {}", outcome.operation, package));
    }
    output::report(outcome);
}

async fn dispatch(cli: &Cli, config: &MpmConfig) -> anyhow::Result<Status> {
    let env: BTreeMap<String, String> = std::env::vars().collect();
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let runner = ProcessExecutor::new(env.clone(), cwd.clone()).with_timeout(config.timeout());
    let registry = Registry::builtin()?;
    let dispatcher =
        Dispatcher::new(registry, runner, config, env.get("PATH").cloned()).with_working_dir(cwd);
    let error_policy = ErrorPolicy::from_flag(config.stop_on_error);
    let policy = |op: Operation| -> SelectionPolicy { config.policy(op) };

    let status = match &cli.command {
        Commands::Managers => {
            let selection = dispatcher.survey(&policy(Operation::Installed)).await?;
            print!("{}", output::managers_table(&selection));
            if selection.available.is_empty() {
                Status::TotalFailure
            } else {
                Status::Success
            }
        }
        Commands::Installed { duplicates } => {
            let outcome = dispatcher
                .run(&policy(Operation::Installed), &Request::All, error_policy)
                .await?;
            show_listing(&outcome, *duplicates);
            outcome.status
        }
        Commands::Outdated => {
            let outcome = dispatcher
                .run(&policy(Operation::Outdated), &Request::All, error_policy)
                .await?;
            show_listing(&outcome, false);
            outcome.status
        }
        Commands::Search {
            query,
            extended,
            exact,
        } => {
            let query = SearchQuery::new(query.clone())
                .extended(*extended)
                .exact(*exact);
            let outcome = dispatcher
                .run(&policy(Operation::Search), &Request::Search(query), error_policy)
                .await?;
            if outcome.packages.is_empty() {
                output::info("No matching packages");
            } else {
                print!("{}", output::search_table(&outcome.packages));
            }
            output::report(&outcome);
            outcome.status
        }
        Commands::Install { packages } => {
            let request = Request::Packages(parse_specifiers(packages)?);
            let outcome = dispatcher
                .run(&policy(Operation::Install), &request, error_policy)
                .await?;
            show_changes(&outcome);
            outcome.status
        }
        Commands::Upgrade { packages } if packages.is_empty() => {
            let outcome = dispatcher
                .run(&policy(Operation::UpgradeAll), &Request::All, error_policy)
                .await?;
            show_changes(&outcome);
            outcome.status
        }
        Commands::Upgrade { packages } => {
            let request = Request::Packages(parse_specifiers(packages)?);
            let outcome = dispatcher
                .run(&policy(Operation::Upgrade), &request, error_policy)
                .await?;
            show_changes(&outcome);
            outcome.status
        }
        Commands::Remove { packages } => {
            let request = Request::Packages(parse_specifiers(packages)?);
            let outcome = dispatcher
                .run(&policy(Operation::Remove), &request, error_policy)
                .await?;
            show_changes(&outcome);
            outcome.status
        }
        Commands::Sync | Commands::Cleanup => {
            let op = if matches!(cli.command, Commands::Sync) {
                Operation::Sync
            } else {
                Operation::Cleanup
            };
            let outcome = dispatcher.run(&policy(op), &Request::All, error_policy).await?;
            for report in outcome.reports.iter().filter(|r| !r.failed && !r.skipped) {
                output::success(&format!("{} {}", report.manager, op));
            }
            output::report(&outcome);
            outcome.status
        }
        Commands::Backup { path, mode } => {
            let (outcome, written) = dispatcher
                .backup(&policy(Operation::Backup), path, *mode, error_policy)
                .await?;
            if let Some(document) = written {
                output::success(&format!(
                    "Wrote {} packages from {} managers to {}",
                    document.entry_count(),
                    document.managers.len(),
                    path.display()
                ));
            }
            output::report(&outcome);
            outcome.status
        }
        Commands::Restore { path } => {
            let outcome = dispatcher
                .restore(&policy(Operation::Install), path, error_policy)
                .await?;
            show_changes(&outcome);
            outcome.status
        }
        Commands::Completions { .. } => {
            bail!("Completions are generated before dispatching")
        }
    };
    Ok(status)
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "mpm", &mut std::io::stdout());
        return Ok(0);
    }

    init_tracing(cli.verbose)?;
    debug!("Argument parsing complete.");

    let config = load_config_with_env(cli.config.clone(), std::env::vars())?;
    let config = apply_cli_overrides(config, &cli)?;
    debug!("{:?}", config);

    // Dropping the dispatch future kills every running child.
    tokio::select! {
        status = dispatch(&cli, &config) => Ok(status?.exit_code()),
        _ = tokio::signal::ctrl_c() => {
            output::warning("Interrupted");
            Ok(INTERRUPTED)
        }
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
