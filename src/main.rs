// src/main.rs
// interpose - answers a stream-json worker's questions with a read-only resolver

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use interpose::config::{AnswerFormat, InterposerConfig, ReadOnlyTools, TransportKind};
use interpose::Interposer;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "interpose")]
#[command(about = "Run a worker agent and answer its questions with a read-only resolver")]
#[command(version)]
struct Cli {
    /// Task prompt handed to the worker
    #[arg(required = true)]
    task: Vec<String>,

    /// Config file (default: ~/.interpose/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker executable
    #[arg(long)]
    worker: Option<String>,

    /// Resolver executable
    #[arg(long)]
    resolver: Option<String>,

    /// Answer envelope shape the worker expects
    #[arg(long, value_enum)]
    answer_format: Option<AnswerFormat>,

    /// How the worker's input and output are connected
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// Seconds to wait for one resolver answer
    #[arg(long, value_name = "SECS")]
    resolver_timeout: Option<u64>,

    /// Comma-separated read-only tools granted to the resolver
    #[arg(long, value_name = "TOOLS")]
    resolver_tools: Option<String>,

    /// Name of the worker's question tool
    #[arg(long)]
    question_tool: Option<String>,

    /// Working directory for both worker and resolver
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags win over the file and environment layers
    fn apply(&self, config: &mut InterposerConfig) -> Result<()> {
        if let Some(ref worker) = self.worker {
            config.worker_binary = worker.clone();
        }
        if let Some(ref resolver) = self.resolver {
            config.resolver_binary = resolver.clone();
        }
        if let Some(format) = self.answer_format {
            config.answer_format = format;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(secs) = self.resolver_timeout {
            config.resolver_timeout = Duration::from_secs(secs);
        }
        if let Some(ref tools) = self.resolver_tools {
            config.resolver_tools = ReadOnlyTools::parse(tools)?;
        }
        if let Some(ref tool) = self.question_tool {
            config.question_tool = tool.clone();
        }
        if let Some(ref cwd) = self.cwd {
            config.working_dir = Some(cwd.clone());
        }
        Ok(())
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = InterposerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config)?;

    let interposer = Interposer::from_config(config)?;
    let task = cli.task.join(" ");
    debug!(
        worker = %interposer.config().worker_binary,
        resolver = %interposer.config().resolver_binary,
        transport = ?interposer.config().transport,
        format = ?interposer.config().answer_format,
        "Configuration resolved"
    );

    let summary = interposer.run(&task, tokio::io::stdout()).await?;
    info!(
        exit_code = summary.exit_code,
        lines = summary.lines_forwarded,
        answered = summary.questions_answered,
        resolver_failures = summary.resolver_failures,
        write_failures = summary.answer_write_failures,
        rejected = summary.questions_rejected,
        echoes = summary.echoes_discarded,
        "Run finished"
    );
    Ok(summary.exit_code)
}

#[tokio::main]
async fn main() {
    // Load .env files (global first, then project - project overrides)
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".interpose/.env"));
    }
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // stdout carries the transcript, so logs stay on stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("interpose: failed to install logger: {}", e);
    }

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("interpose: {:#}", e);
            std::process::exit(1);
        }
    }
}
