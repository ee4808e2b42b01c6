//! Vodaflow console bot.
//!
//! Reads operator messages from stdin and answers on stdout, driving the
//! same dispatcher a chat front-end would. `run` executes one pipeline
//! without a chat session.

mod console;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use console::ConsoleSurface;
use vodaflow::config::{VodaflowConfig, ENV_ACCESS_CODES};
use vodaflow::dispatch::{Capabilities, Command, Dispatcher, SessionStore};
use vodaflow::events::{ChatId, LoggingSink};
use vodaflow::pipelines::{
    CashPipeline, DataDir, OperationalPipeline, PipelineContext, ServicePipeline,
};
use vodaflow::sources::{ApiClient, NominatimClient, PortalClient};
use vodaflow::utils::SystemClock;

#[derive(Debug, Parser)]
#[command(name = "vodaflow-bot", version, about = "Water vending data pipelines")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long, env = "VODAFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Read operator messages from stdin (default).
    Chat {
        /// Chat id the messages come from.
        #[arg(long, default_value_t = 1)]
        chat: ChatId,
    },
    /// Run one pipeline and exit.
    Run {
        /// Which pipeline.
        #[arg(value_enum)]
        pipeline: PipelineArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PipelineArg {
    Operational,
    Cash,
    Service,
}

impl From<PipelineArg> for Command {
    fn from(value: PipelineArg) -> Self {
        match value {
            PipelineArg::Operational => Self::RunOperational,
            PipelineArg::Cash => Self::RunCash,
            PipelineArg::Service => Self::RunService,
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "vodaflow=debug,vodaflow_bot=debug"
    } else {
        "vodaflow=info,vodaflow_bot=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<VodaflowConfig> {
    let mut config = VodaflowConfig::load(cli.config.as_deref())
        .with_context(|| "loading configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    if !config.portal.has_credentials() {
        warn!("Portal credentials not set; operational runs will fail at login");
    }
    if config.access.codes.is_empty() {
        warn!("No access codes configured; set [access.codes] or {ENV_ACCESS_CODES}");
    }
    Ok(config)
}

fn build_capabilities(config: Arc<VodaflowConfig>) -> Result<Capabilities> {
    let clock = Arc::new(SystemClock);
    let ctx = PipelineContext::new(config.clone(), clock.clone());
    let portal = Arc::new(PortalClient::new(config.portal.clone(), clock)?);
    let api = Arc::new(ApiClient::new(config.api.clone())?);
    let geocoder = Arc::new(NominatimClient::new(config.geocoder.clone())?);

    Ok(Capabilities::new()
        .with(
            Command::RunOperational,
            Arc::new(OperationalPipeline::new(ctx.clone(), portal, api.clone())),
        )
        .with(Command::RunCash, Arc::new(CashPipeline::new(ctx.clone(), api)))
        .with(Command::RunService, Arc::new(ServicePipeline::new(ctx, geocoder))))
}

async fn run_once(capabilities: &Capabilities, pipeline: PipelineArg) -> Result<()> {
    let pipeline = capabilities.resolve(pipeline.into())?;
    info!(pipeline = pipeline.name(), "Running once");
    if !pipeline.run_full_cycle(Arc::new(LoggingSink::default())).await {
        bail!("{} failed", pipeline.name());
    }
    if let Some(summary) = pipeline.summary_text() {
        println!("{summary}");
    }
    for artifact in pipeline.artifacts() {
        println!("{}: {}", artifact.caption, artifact.path().display());
    }
    Ok(())
}

async fn chat_loop(
    config: &VodaflowConfig,
    capabilities: Capabilities,
    chat: ChatId,
) -> Result<()> {
    let dispatcher = Dispatcher::new(
        Arc::new(ConsoleSurface::new(std::io::stdout())),
        Arc::new(SessionStore::new()),
        config.access.clone(),
        capabilities,
        config.status.clone(),
        DataDir::new(config.data_dir.clone()),
    );
    dispatcher.handle(chat, "/start").await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut runs = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(run) = dispatcher.handle(chat, &line).await {
            runs.push(run);
        }
    }
    for run in runs {
        if let Err(e) = run.join().await {
            warn!(error = %e, "Run ended abnormally");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = Arc::new(load_config(&cli)?);
    let capabilities = build_capabilities(config.clone())?;
    match cli.mode {
        Some(Mode::Run { pipeline }) => run_once(&capabilities, pipeline).await,
        Some(Mode::Chat { chat }) => chat_loop(&config, capabilities, chat).await,
        None => chat_loop(&config, capabilities, 1).await,
    }
}
