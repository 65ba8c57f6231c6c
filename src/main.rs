mod catalog;
mod command;
mod config;
mod config_codec;
mod env_profile;
mod error;
mod js_literal;
mod mcp_server;
mod mutators;
mod process_runner;
mod run_cache;
mod sandbox;
mod scaffold;
mod summary;
mod test_structure;
mod text_store;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::catalog::{tool_descriptors, ToolCatalog};
use crate::config::Config;
use crate::config_codec::ConfigCodec;
use crate::process_runner::TokioCommandExecutor;
use crate::sandbox::PathSandbox;

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "MCP server that lets an agent inspect, edit and run a Cypress test suite"
)]
struct Cli {
    /// Path to TOML settings file.
    #[arg(
        long,
        global = true,
        env = "CYPRESS_MCP_CONFIG",
        default_value = "cypress-mcp.toml"
    )]
    config: PathBuf,

    /// Repository root; overrides the settings file and MCP_CYPRESS_REPO_ROOT.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Log level filter, e.g. info,debug,trace. RUST_LOG wins when set.
    #[arg(long, global = true, env = "CYPRESS_MCP_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommand {
    /// Serve MCP over stdin/stdout.
    Serve,
    /// Run non-interactive diagnostics against the repository.
    Doctor(OutputArgs),
    /// Print the tool catalog.
    Tools(OutputArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct OutputArgs {
    /// Emit output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct DoctorReport {
    ok: bool,
    checks: Vec<DoctorCheck>,
}

#[derive(Debug, Clone, Serialize)]
struct DoctorCheck {
    id: String,
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl DoctorCheck {
    fn new(id: &str, status: &str, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            id: id.to_owned(),
            status: status.to_owned(),
            message: message.into(),
            detail,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    match cli.command.clone().unwrap_or(CliCommand::Serve) {
        CliCommand::Serve => run_server(&cli).await,
        CliCommand::Doctor(args) => run_doctor(&cli, args),
        CliCommand::Tools(args) => {
            print_tools(args.json);
            Ok(())
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::load(&cli.config)?;
    cfg.apply_cli_overrides(cli.repo.as_deref());
    cfg.validate()?;
    Ok(cfg)
}

async fn run_server(cli: &Cli) -> Result<()> {
    let cfg = load_settings(cli)?;
    info!(repo_root = %cfg.workspace.repo_root.display(), "starting cypress mcp server");
    let catalog = Arc::new(ToolCatalog::new(cfg, Arc::new(TokioCommandExecutor))?);

    tokio::select! {
        report = mcp_server::serve_stdio(catalog) => {
            let report = report?;
            info!(
                processed_frames = report.processed_frames,
                error_count = report.error_count,
                "mcp server stopped"
            );
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| anyhow!("failed listening for ctrl-c: {err}"))?;
            warn!("interrupted, shutting down");
        }
    }
    Ok(())
}

fn run_doctor(cli: &Cli, args: OutputArgs) -> Result<()> {
    let settings = load_settings(cli).map_err(|err| format!("{err:#}"));
    let package_runner_available = settings
        .as_ref()
        .map(|cfg| command_available(&cfg.runner.package_runner))
        .unwrap_or(false);
    let report = build_doctor_report(settings, &cli.config, package_runner_available);
    print_doctor_report(&report, args.json);
    if report.ok {
        return Ok(());
    }
    Err(anyhow!("doctor reported blocking issues"))
}

fn build_doctor_report(
    settings: std::result::Result<Config, String>,
    config_path: &Path,
    package_runner_available: bool,
) -> DoctorReport {
    let mut checks = Vec::new();

    let cfg = match settings {
        Ok(cfg) => {
            checks.push(DoctorCheck::new(
                "settings.load",
                "pass",
                format!("loaded {}", config_path.display()),
                (!config_path.exists()).then(|| "file absent, defaults applied".to_owned()),
            ));
            cfg
        }
        Err(err) => {
            checks.push(DoctorCheck::new(
                "settings.load",
                "fail",
                format!("failed to load {}", config_path.display()),
                Some(err),
            ));
            return finish_report(checks);
        }
    };

    let sandbox = match PathSandbox::new(&cfg.workspace.repo_root) {
        Ok(sandbox) => {
            checks.push(DoctorCheck::new(
                "workspace.repo_root",
                "pass",
                sandbox.root().display().to_string(),
                None,
            ));
            sandbox
        }
        Err(err) => {
            checks.push(DoctorCheck::new(
                "workspace.repo_root",
                "fail",
                format!("{} is not usable", cfg.workspace.repo_root.display()),
                Some(err.message),
            ));
            return finish_report(checks);
        }
    };

    let codec = ConfigCodec::new(sandbox.clone(), cfg.workspace.config_files.clone());
    match codec.load(None) {
        Ok(loaded) if loaded.raw.is_some() => checks.push(DoctorCheck::new(
            "cypress.config",
            "pass",
            format!("parsed {}", codec.display(&loaded.path)),
            Some(format!("{} top-level keys", loaded.config.len())),
        )),
        Ok(loaded) => checks.push(DoctorCheck::new(
            "cypress.config",
            "warn",
            "no config file found",
            Some(format!("will be created at {}", codec.display(&loaded.path))),
        )),
        Err(err) => checks.push(DoctorCheck::new(
            "cypress.config",
            "fail",
            "config file does not parse",
            Some(err.message),
        )),
    }

    let local_binary = sandbox.resolve([&cfg.runner.local_binary]);
    let local_available = local_binary.as_ref().is_ok_and(|path| path.is_file());
    match &local_binary {
        Ok(path) if local_available => checks.push(DoctorCheck::new(
            "runner.binary",
            "pass",
            "project-local runner",
            Some(sandbox.display(path)),
        )),
        Ok(_) => checks.push(DoctorCheck::new(
            "runner.binary",
            "pass",
            "package runner",
            Some(format!(
                "{} {} {}",
                cfg.runner.package_runner,
                cfg.runner.package_runner_args.join(" "),
                cfg.runner.tool_name
            )),
        )),
        Err(err) => checks.push(DoctorCheck::new(
            "runner.binary",
            "fail",
            "runner.local_binary is outside the repository",
            Some(err.message.clone()),
        )),
    }

    let runner_status = match (package_runner_available, local_available) {
        (true, _) => "pass",
        (false, true) => "warn",
        (false, false) => "fail",
    };
    checks.push(DoctorCheck::new(
        "runner.package_runner",
        runner_status,
        if package_runner_available {
            format!("{} is available", cfg.runner.package_runner)
        } else {
            format!("{} is not available", cfg.runner.package_runner)
        },
        None,
    ));

    finish_report(checks)
}

fn finish_report(checks: Vec<DoctorCheck>) -> DoctorReport {
    let ok = checks.iter().all(|check| check.status != "fail");
    DoctorReport { ok, checks }
}

fn print_doctor_report(report: &DoctorReport, json_output: bool) {
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(report)
                .unwrap_or_else(|_| "{\"ok\":false,\"checks\":[]}".to_owned())
        );
        return;
    }

    println!("doctor: {}", if report.ok { "ok" } else { "issues" });
    for check in &report.checks {
        let detail = check
            .detail
            .as_deref()
            .map(|value| format!(" ({value})"))
            .unwrap_or_default();
        println!(
            "[{}] {}: {}{}",
            check.status.to_uppercase(),
            check.id,
            check.message,
            detail
        );
    }
}

fn print_tools(json_output: bool) {
    let tools = tool_descriptors();
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_owned())
        );
        return;
    }
    for tool in &tools {
        println!("{}: {}", tool.name, tool.description);
    }
}

fn command_available(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn init_logging(filter: &str) -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed initialising logging: {err}"))
}
