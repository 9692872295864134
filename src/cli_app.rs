//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use finops_autopilot::core::config::Config;
use finops_autopilot::core::errors::FapError;
use finops_autopilot::daemon::job::{
    Disposition, JsonFileSource, PassReport, RecommendationRecord, RecommendationSource,
    ReportingDispatcher,
};
use finops_autopilot::daemon::scheduler::SchedulerConfig;
use finops_autopilot::daemon::signals::SignalFlags;
use finops_autopilot::engine::Engine;
use finops_autopilot::policy::evaluator::{self, RecommendationCandidate};
use finops_autopilot::policy::keys;
use finops_autopilot::store::ConfigEntry;

/// FinOps autopilot: policy gate for autonomous cost optimizations.
#[derive(Debug, Parser)]
#[command(
    name = "fap",
    author,
    version,
    about = "FinOps Autopilot - autonomous execution policy engine",
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
    /// Identity recorded as `updated_by` on writes.
    #[arg(long, global = true, value_name = "NAME")]
    actor: Option<String>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show or change the autonomous-execution policy.
    AgentConfig(AgentConfigArgs),
    /// Show or toggle operating modes.
    Mode(ModeArgs),
    /// Raw key/value settings (admin side-channel).
    SystemConfig(SystemConfigArgs),
    /// Check whether recommendations may run without approval.
    Evaluate(EvaluateArgs),
    /// Run optimization passes over pending recommendations.
    Run(RunArgs),
    /// View application configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    const fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Debug, Clone, Args)]
struct AgentConfigArgs {
    #[command(subcommand)]
    command: Option<AgentConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum AgentConfigCommand {
    /// Print the effective policy.
    Show,
    /// Flip the autonomous-execution kill-switch.
    SetAutonomous {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Highest risk level (0-100) allowed without approval.
    SetRisk { value: f64 },
    /// Savings (thousandths of a currency unit) above which approval is required.
    SetSavings { value: i64 },
    /// Replace the auto-execute type allow-list. No types disables all.
    SetTypes { types: Vec<String> },
    /// Write missing policy keys with their defaults.
    Seed,
}

#[derive(Debug, Clone, Args)]
struct ModeArgs {
    #[command(subcommand)]
    command: Option<ModeCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ModeCommand {
    /// Print every mode flag.
    Status,
    /// Enable or disable prod (AI-assisted) mode.
    Prod {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Enable or disable simulation (dry-run) mode.
    Simulation {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Enable or disable autonomous execution.
    Autonomous {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Debug, Clone, Args)]
struct SystemConfigArgs {
    #[command(subcommand)]
    command: Option<SystemConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum SystemConfigCommand {
    /// List every stored setting.
    List,
    /// Show one setting.
    Get { key: String },
    /// Overwrite an existing setting.
    Set { key: String, value: String },
}

#[derive(Debug, Clone, Args)]
struct EvaluateArgs {
    /// Recommendation type, e.g. `resize`.
    #[arg(long = "type", value_name = "TYPE", required_unless_present = "file")]
    rec_type: Option<String>,
    /// Risk level 0-100.
    #[arg(long, requires = "rec_type")]
    risk: Option<f64>,
    /// Projected annual savings, thousandths of a currency unit.
    #[arg(long, requires = "rec_type")]
    savings: Option<i64>,
    /// JSON array of recommendation records.
    #[arg(long, value_name = "PATH", conflicts_with = "rec_type")]
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// JSON array of recommendation records.
    #[arg(long, value_name = "PATH")]
    candidates: PathBuf,
    /// Run a single pass and exit.
    #[arg(long)]
    once: bool,
    /// Override the pass interval in seconds.
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
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

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
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
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<FapError> for CliError {
    fn from(err: FapError) -> Self {
        match err {
            FapError::Validation { .. }
            | FapError::InvalidConfig { .. }
            | FapError::MissingConfig { .. }
            | FapError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::AgentConfig(args) => run_agent_config(cli, args),
        Command::Mode(args) => run_mode(cli, args),
        Command::SystemConfig(args) => run_system_config(cli, args),
        Command::Evaluate(args) => run_evaluate(cli, args),
        Command::Run(args) => run_passes(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn actor(cli: &Cli) -> String {
    cli.actor.clone().unwrap_or_else(|| {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        format!("cli:{user}")
    })
}

/// Load config, open the engine, and seed any missing policy keys.
fn open_engine(cli: &Cli) -> Result<(Config, Engine), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let engine = Engine::open(&config)?;
    engine.seed(&config.policy.seed_actor)?;
    Ok((config, engine))
}

fn finish(engine: Engine) -> Result<(), CliError> {
    engine.shutdown().map_err(CliError::from)
}

// ──────────────────── agent-config ────────────────────

fn run_agent_config(cli: &Cli, args: &AgentConfigArgs) -> Result<(), CliError> {
    let (config, engine) = open_engine(cli)?;
    let who = actor(cli);

    let label = match &args.command {
        None | Some(AgentConfigCommand::Show) => "agent-config show",
        Some(AgentConfigCommand::SetAutonomous { state }) => {
            engine.modes().set_autonomous_mode(state.enabled(), &who)?;
            "agent-config set-autonomous"
        }
        Some(AgentConfigCommand::SetRisk { value }) => {
            engine.settings().set_max_autonomous_risk_level(*value, &who)?;
            "agent-config set-risk"
        }
        Some(AgentConfigCommand::SetSavings { value }) => {
            engine.settings().set_approval_required_above_savings(*value, &who)?;
            "agent-config set-savings"
        }
        Some(AgentConfigCommand::SetTypes { types }) => {
            engine.settings().set_auto_execute_types(types, &who)?;
            "agent-config set-types"
        }
        Some(AgentConfigCommand::Seed) => {
            let report = engine.settings().seed_defaults(&config.policy.seed_actor)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Seeded {} key(s).", report.created.len());
                    for key in &report.created {
                        println!("  + {key}");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "agent-config seed",
                    "report": serde_json::to_value(&report)?,
                }))?,
            }
            return finish(engine);
        }
    };

    let policy = engine.settings().policy_config()?;
    match output_mode(cli) {
        OutputMode::Human => {
            let kill_switch = if policy.autonomous_mode_enabled {
                "enabled".green()
            } else {
                "disabled".red()
            };
            println!("Autonomous mode:        {kill_switch}");
            println!("Max risk level:         {}", policy.max_autonomous_risk_level);
            println!(
                "Approval above savings: {}",
                policy.approval_required_above_savings
            );
            let types: Vec<&str> = policy.auto_execute_types.iter().map(String::as_str).collect();
            println!("Auto-execute types:     {}", types.join(", "));
        }
        OutputMode::Json => write_json_line(&json!({
            "command": label,
            "policy": serde_json::to_value(&policy)?,
        }))?,
    }
    finish(engine)
}

// ──────────────────── mode ────────────────────

fn run_mode(cli: &Cli, args: &ModeArgs) -> Result<(), CliError> {
    let (_config, engine) = open_engine(cli)?;
    let who = actor(cli);
    let modes = engine.modes();

    let label = match &args.command {
        None | Some(ModeCommand::Status) => "mode status",
        Some(ModeCommand::Prod { state }) => {
            modes.set_prod_mode(state.enabled(), &who)?;
            "mode prod"
        }
        Some(ModeCommand::Simulation { state }) => {
            modes.set_simulation_mode(state.enabled(), &who)?;
            "mode simulation"
        }
        Some(ModeCommand::Autonomous { state }) => {
            modes.set_autonomous_mode(state.enabled(), &who)?;
            "mode autonomous"
        }
    };

    let state = modes.mode_state()?;
    match output_mode(cli) {
        OutputMode::Human => {
            println!("Autonomous: {}", on_off(state.autonomous_mode_enabled));
            println!("Simulation: {}", on_off(state.simulation_mode_enabled));
            if state.prod_mode.enabled {
                println!(
                    "Prod mode:  {} ({}s of {}s left)",
                    on_off(true),
                    state.prod_mode.time_remaining_secs,
                    state.prod_mode.window_secs
                );
            } else {
                println!("Prod mode:  {}", on_off(false));
            }
            println!("Analysis:   {}", state.analysis_method());
        }
        OutputMode::Json => write_json_line(&json!({
            "command": label,
            "modes": serde_json::to_value(&state)?,
            "analysis": state.analysis_method(),
        }))?,
    }
    finish(engine)
}

fn on_off(enabled: bool) -> colored::ColoredString {
    if enabled { "on".green() } else { "off".dimmed() }
}

// ──────────────────── system-config ────────────────────

fn run_system_config(cli: &Cli, args: &SystemConfigArgs) -> Result<(), CliError> {
    let (_config, engine) = open_engine(cli)?;
    let settings = engine.settings();

    match &args.command {
        None | Some(SystemConfigCommand::List) => {
            let entries = settings.system_config()?;
            emit_entries(cli, "system-config list", &entries)?;
        }
        Some(SystemConfigCommand::Get { key }) => {
            let entry = engine.cache().get(key)?;
            let Some(entry) = entry else {
                return Err(CliError::User(format!("no setting named {key:?}")));
            };
            emit_entries(cli, "system-config get", std::slice::from_ref(&entry))?;
        }
        Some(SystemConfigCommand::Set { key, value }) => {
            let updated = settings.put_system_config(key, value, &actor(cli))?;
            let Some(entry) = updated else {
                return Err(CliError::User(format!(
                    "no setting named {key:?}; only existing keys can be updated"
                )));
            };
            emit_entries(cli, "system-config set", std::slice::from_ref(&entry))?;
        }
    }
    finish(engine)
}

fn emit_entries(cli: &Cli, label: &str, entries: &[ConfigEntry]) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            for entry in entries {
                let by = entry.updated_by.as_deref().unwrap_or("-");
                println!(
                    "{:<42} {:<24} {} by {by}",
                    entry.key.bold(),
                    entry.value,
                    entry.updated_at.to_rfc3339()
                );
                if let Some(desc) = entry.description.as_deref().or_else(|| keys::description(&entry.key)) {
                    println!("    {}", desc.dimmed());
                }
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": label,
            "entries": serde_json::to_value(entries)?,
        }))?,
    }
    Ok(())
}

// ──────────────────── evaluate ────────────────────

fn run_evaluate(cli: &Cli, args: &EvaluateArgs) -> Result<(), CliError> {
    let inline = match (&args.file, &args.rec_type, args.risk, args.savings) {
        (Some(_), ..) => None,
        (None, Some(rec_type), Some(risk), Some(savings)) => {
            Some(RecommendationCandidate::new(rec_type.clone(), risk, savings))
        }
        (None, _, risk, savings) => {
            let missing: Vec<&str> = [("--risk", risk.is_none()), ("--savings", savings.is_none())]
                .into_iter()
                .filter_map(|(flag, absent)| absent.then_some(flag))
                .collect();
            return Err(CliError::User(format!(
                "evaluate needs --type, --risk and --savings (or --file); missing {}",
                missing.join(", ")
            )));
        }
    };

    let (_config, engine) = open_engine(cli)?;
    let policy = engine.settings().policy_config()?;

    let candidates: Vec<(String, RecommendationCandidate)> = if let Some(path) = &args.file {
        JsonFileSource::new(path)
            .pending()?
            .iter()
            .map(|r: &RecommendationRecord| (r.id.clone(), r.candidate()))
            .collect()
    } else {
        inline.into_iter().map(|c| ("cli".to_string(), c)).collect()
    };

    let mut results = Vec::with_capacity(candidates.len());
    let mut invalid = 0usize;
    for (id, candidate) in &candidates {
        match evaluator::evaluate(candidate, &policy) {
            Ok(result) => results.push(json!({
                "id": id,
                "candidate": serde_json::to_value(candidate)?,
                "eligible": result.eligible,
                "vetoes": result.vetoes.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })),
            Err(e) => {
                invalid += 1;
                results.push(json!({
                    "id": id,
                    "candidate": serde_json::to_value(candidate)?,
                    "error": e.public_message(),
                }));
            }
        }
    }

    match output_mode(cli) {
        OutputMode::Human => {
            for row in &results {
                let id = row["id"].as_str().unwrap_or("?");
                if let Some(err) = row["error"].as_str() {
                    println!("{id}: {} ({err})", "invalid".red());
                } else if row["eligible"].as_bool() == Some(true) {
                    println!("{id}: {}", "autonomous".green());
                } else {
                    let reasons: Vec<&str> = row["vetoes"]
                        .as_array()
                        .map(|v| v.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();
                    println!("{id}: {} ({})", "approval required".yellow(), reasons.join("; "));
                }
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "evaluate",
            "results": results,
        }))?,
    }
    finish(engine)?;

    if invalid == 0 {
        Ok(())
    } else if invalid == candidates.len() {
        Err(CliError::User(format!("{invalid} candidate(s) were malformed")))
    } else {
        Err(CliError::Partial(format!("{invalid} candidate(s) were malformed")))
    }
}

// ──────────────────── run ────────────────────

fn run_passes(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let (config, engine) = open_engine(cli)?;
    let source = JsonFileSource::new(&args.candidates);
    let dispatcher = ReportingDispatcher;

    if args.once {
        let report = engine.pass().run(&source, &dispatcher)?;
        emit_pass_report(cli, &report)?;
        finish(engine)?;
        return if report.count(Disposition::Failed) > 0 {
            Err(CliError::Partial(format!(
                "{} dispatch(es) failed",
                report.count(Disposition::Failed)
            )))
        } else {
            Ok(())
        };
    }

    let schedule = SchedulerConfig {
        interval: args
            .interval
            .map_or_else(|| config.schedule.interval(), Duration::from_secs),
        tick: config.schedule.tick(),
        run_immediately: true,
        max_passes: None,
    };
    let hash = config.stable_hash()?;
    let scheduler = engine.scheduler(SignalFlags::install(), schedule);
    eprintln!(
        "[FAP-RUN] scheduler started (interval={}s, pid={})",
        scheduler_interval_secs(args, &config),
        std::process::id()
    );
    let stats = scheduler.run(&source, &dispatcher, &hash)?;

    match output_mode(cli) {
        OutputMode::Human => println!(
            "Stopped after {} pass(es): {} executed, {} sent for approval, {} failed pass(es).",
            stats.passes, stats.executed, stats.approvals_requested, stats.failed_passes
        ),
        OutputMode::Json => write_json_line(&json!({
            "command": "run",
            "stats": serde_json::to_value(&stats)?,
        }))?,
    }
    finish(engine)
}

fn scheduler_interval_secs(args: &RunArgs, config: &Config) -> u64 {
    args.interval.unwrap_or(config.schedule.interval_secs)
}

fn emit_pass_report(cli: &Cli, report: &PassReport) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if report.prod_mode_reverted {
                println!("Prod mode window elapsed; reverted to heuristic analysis.");
            }
            for outcome in &report.outcomes {
                let tag = match outcome.disposition {
                    Disposition::Executed => outcome.disposition.to_string().green(),
                    Disposition::Simulated => outcome.disposition.to_string().cyan(),
                    Disposition::ApprovalRequested => outcome.disposition.to_string().yellow(),
                    Disposition::Rejected | Disposition::Failed => {
                        outcome.disposition.to_string().red()
                    }
                };
                println!("{:<24} {:<16} {tag}", outcome.id, outcome.rec_type);
            }
            println!("{}", report.summary());
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "run",
            "report": serde_json::to_value(report)?,
        }))?,
    }
    Ok(())
}

// ──────────────────── config ────────────────────

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
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
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
                OutputMode::Json => write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": true,
                        "path": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    }))?,
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": false,
                        "error": e.to_string(),
                    }))?,
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("FAP_OUTPUT_FORMAT").ok();
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
