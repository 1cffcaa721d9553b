use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;

use napy::config::{self, AppConfig, ConfigError};
use napy::notify::format::{format_datetime, format_duration};
use napy::storage::{RunId, RunStore};
use napy::Runner;

#[derive(Parser)]
#[command(
    name = "napy",
    about = "Run a shell command in the background, log it, and get notified when it finishes",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: ~/.config/napy/config.toml)
    #[arg(long, env = "NAPY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run in this terminal instead of detaching
    #[arg(long)]
    foreground: bool,

    /// List the N most recent runs and exit
    #[arg(long, value_name = "N", conflicts_with_all = ["show", "foreground"])]
    recent: Option<usize>,

    /// Print one run record as JSON and exit
    #[arg(long, value_name = "ID", conflicts_with = "foreground")]
    show: Option<i64>,

    /// Internal: act as the detached worker
    #[arg(long, hide = true)]
    worker: bool,

    /// Command line to run through the shell
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required_unless_present_any = ["recent", "show"]
    )]
    command: Vec<String>,
}

fn init_tracing(ansi: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}

fn print_recent(config: &AppConfig, limit: usize) -> Result<()> {
    let store = RunStore::open(&config.database)?;
    let runs = store.recent(limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!("{:<6} | {:<19} | {:<24} | {:<7} | Command", "ID", "Started", "Duration", "Exit");
    println!("{:-<6}-|-{:-<19}-|-{:-<24}-|-{:-<7}-|-{:-<30}", "", "", "", "", "");
    for run in runs {
        let (duration, exit) = match &run.completion {
            Some(c) => (
                format_duration(c.finished_at - run.started_at),
                c.exit_code.to_string(),
            ),
            None => ("running".to_string(), "-".to_string()),
        };
        println!(
            "{:<6} | {:<19} | {:<24} | {:<7} | {}",
            run.id,
            format_datetime(&run.started_at),
            duration,
            exit,
            run.command
        );
    }
    Ok(())
}

fn print_run(config: &AppConfig, id: i64) -> Result<()> {
    let store = RunStore::open(&config.database)?;
    let run = store.get(RunId(id))?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(!cli.worker);

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::Missing(path)) if !cli.worker => {
            config::write_template(&path)
                .with_context(|| format!("failed to write config template to {}", path.display()))?;
            eprintln!(
                "No configuration found. A template was written to {}.\nEdit it and run napy again.",
                path.display()
            );
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(limit) = cli.recent {
        print_recent(&config, limit)?;
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(id) = cli.show {
        print_run(&config, id)?;
        return Ok(ExitCode::SUCCESS);
    }

    let command = cli.command.join(" ");
    if command.trim().is_empty() {
        bail!("no command given");
    }

    if cli.worker || cli.foreground {
        let outcome = Runner::new(config).execute(&command).await;
        return Ok(exit_code(outcome.exit_code));
    }

    napy::dispatch(&config_path, &config, &command)?;
    Ok(ExitCode::SUCCESS)
}
