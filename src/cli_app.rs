//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use chaos_verdict::core::config::Config;
use chaos_verdict::core::errors::ChaosError;
use chaos_verdict::core::scenario::Scenario;
use chaos_verdict::monitor::experiment::{ExperimentMonitor, ExperimentRecord, MonitorState};
use chaos_verdict::runner::orchestrator::{ExperimentRunner, RunOptions, RunSummary};
use chaos_verdict::runner::result::{Outcome, Verdict};

/// Chaos Verdict: run a fault-injection experiment and judge it against SLOs.
#[derive(Debug, Parser)]
#[command(
    name = "chv",
    author,
    version,
    about = "Chaos Verdict - fault injection with an SLO verdict",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run one experiment and exit with its verdict.
    Run(RunArgs),
    /// Parse and check a scenario file without running it.
    Validate(ValidateArgs),
    /// Show the running experiment and the last result.
    Status,
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Scenario file (`.toml` or `.json`).
    #[arg(value_name = "SCENARIO")]
    scenario: PathBuf,
    /// Write the Markdown report here instead of `paths.report_dir`.
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,
    /// Override the target's fault duration.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct ValidateArgs {
    /// Scenario file (`.toml` or `.json`).
    #[arg(value_name = "SCENARIO")]
    scenario: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// Top-level CLI error type.
///
/// Exit codes stay clear of 0-3, which carry experiment verdicts.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input such as an unreadable scenario or config file.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 64,
            Self::Runtime(_) | Self::Io(_) => 74,
            Self::Json(_) => 70,
        }
    }
}

impl From<ChaosError> for CliError {
    fn from(error: ChaosError) -> Self {
        match error {
            ChaosError::InvalidConfig { .. }
            | ChaosError::MissingConfig { .. }
            | ChaosError::ConfigParse { .. }
            | ChaosError::InvalidScenario { .. }
            | ChaosError::UnsupportedScenarioFormat { .. }
            | ChaosError::Serialization { .. } => Self::User(error.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands. `Ok` carries the process exit status.
pub fn run(cli: &Cli) -> Result<i32, CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_experiment(cli, args),
        Command::Validate(args) => run_validate(cli, args).map(|()| 0),
        Command::Status => run_status(cli).map(|()| 0),
        Command::Config(args) => run_config(cli, args).map(|()| 0),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            generate(args.shell, &mut command, name, &mut io::stdout());
            Ok(0)
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn run_experiment(cli: &Cli, args: &RunArgs) -> Result<i32, CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let scenario = Scenario::load(&args.scenario)?;
    let runner = ExperimentRunner::from_config(config)?;

    let options = RunOptions {
        report_dir: args.report_dir.clone(),
        duration_secs: args.duration_secs,
    };
    let summary = runner.run(&scenario, &options);

    match output_mode(cli) {
        OutputMode::Human => print_summary(&summary),
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "exit_code": summary.exit_code(),
                "result": serde_json::to_value(&summary.result)?,
                "report_path": summary.report_path.as_ref().map(|p| p.to_string_lossy()),
                "report_error": summary.report_error,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(summary.exit_code())
}

fn print_summary(summary: &RunSummary) {
    let result = &summary.result;
    println!(
        "{}  {} ({} on {})",
        verdict_badge(result.verdict),
        result.scenario.bold(),
        result.fault,
        result.service
    );
    println!("  Outcome:  {}", outcome_label(result.outcome));
    println!("  Reason:   {}", result.reason);
    println!("  Duration: {}s", result.duration_secs());
    if result.actions.is_empty() {
        println!("  Actions:  none");
    } else {
        println!("  Actions:  {}", result.actions.join("; "));
    }
    if result.safety_tripped {
        println!("  Safety:   {}", "guard tripped".yellow());
    }
    match (&summary.report_path, &summary.report_error) {
        (Some(path), _) => println!("  Report:   {}", path.display()),
        (None, Some(error)) => println!("  Report:   {} ({error})", "not written".red()),
        (None, None) => println!("  Report:   none"),
    }
}

fn verdict_badge(verdict: Verdict) -> String {
    match verdict {
        Verdict::Pass => "PASS".green().bold().to_string(),
        Verdict::Fail => "FAIL".red().bold().to_string(),
    }
}

fn outcome_label(outcome: Outcome) -> String {
    match outcome {
        Outcome::Completed => outcome.label().to_string(),
        Outcome::Aborted => outcome.label().yellow().to_string(),
        Outcome::RemediationFailed => format!(
            "{} (manual follow-up required)",
            outcome.label().red().bold()
        ),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn run_validate(cli: &Cli, args: &ValidateArgs) -> Result<(), CliError> {
    let scenario = Scenario::load(&args.scenario)?;
    let fault = scenario.fault_kind()?;
    let target = scenario.primary_target()?;
    let digest = scenario.digest()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Scenario is valid.");
            println!("  Name:         {}", scenario.name);
            println!("  Fault:        {fault}");
            println!("  Service:      {}", target.service);
            println!("  Duration:     {}s", target.duration_secs);
            println!("  Blast radius: {}", scenario.safety.blast_radius);
            println!(
                "  SLO:          p95 <= {}ms, errors <= {}, availability >= {}",
                scenario.slo.p95_ms, scenario.slo.error_rate, scenario.slo.availability
            );
            println!("  Digest:       {digest}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "validate",
                "valid": true,
                "name": scenario.name,
                "fault": fault.label(),
                "service": target.service,
                "duration_secs": target.duration_secs,
                "blast_radius": scenario.safety.blast_radius,
                "slo": serde_json::to_value(scenario.slo)?,
                "digest": digest,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let state_file = config.paths.state_file;
    let state = load_state(&state_file)?;

    match output_mode(cli) {
        OutputMode::Human => print_status(&state_file, state.as_ref()),
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "state_file": state_file.to_string_lossy(),
                "state": state.map(serde_json::to_value).transpose()?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn load_state(path: &Path) -> Result<Option<MonitorState>, CliError> {
    if !path.exists() {
        return Ok(None);
    }
    ExperimentMonitor::read_state(path)
        .map(Some)
        .map_err(|e| CliError::Runtime(e.to_string()))
}

fn print_status(state_file: &Path, state: Option<&MonitorState>) {
    let Some(state) = state else {
        println!("No experiments recorded yet.");
        println!("  State file: {} (missing)", state_file.display());
        return;
    };

    match &state.current {
        Some(current) => {
            println!("{}", "Experiment in progress".yellow().bold());
            print_record(current);
        }
        None => println!("No experiment in progress."),
    }
    if let Some(last) = &state.last {
        println!("\nLast experiment:");
        print_record(last);
    }

    let c = &state.counters;
    println!(
        "\nTotals: {} started, {} passed, {} failed, {} aborted, {} remediation failed, {} abandoned",
        c.started, c.passed, c.failed, c.aborted, c.remediation_failed, c.abandoned
    );
    println!("  State file: {}", state_file.display());
}

fn print_record(record: &ExperimentRecord) {
    println!("  Scenario: {} ({})", record.scenario, record.run_id);
    println!("  Fault:    {} on {}", record.fault, record.service);
    println!("  Started:  {}", record.started_at);
    if let Some(ended) = &record.ended_at {
        println!("  Ended:    {ended}");
    }
    if let (Some(verdict), Some(outcome)) = (record.verdict, record.outcome) {
        println!("  Verdict:  {} / {}", verdict_badge(verdict), outcome_label(outcome));
    }
    if let Some(reason) = &record.reason {
        println!("  Reason:   {reason}");
    }
    if record.rollback_triggered {
        println!("  Rollback: triggered");
    }
    if let Some(report) = &record.report_path {
        println!("  Report:   {}", report.display());
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => {
            let config = Config::load(cli.config.as_deref())?;
            let hash = config.stable_hash()?;

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Configuration is valid.");
                    println!("  Source: {}", config.paths.config_file.display());
                    println!("  Hash: {hash}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config validate",
                        "valid": true,
                        "source": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("CHV_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
