use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use browser_pilot::actuator::Actuator;
use browser_pilot::brain::OpenAiDecider;
use browser_pilot::config::{self, BrowserConfig, DeciderConfig, LoopConfig};
use browser_pilot::events;
use browser_pilot::hands::ChromeActuator;
use browser_pilot::orchestrator::TaskOrchestrator;
use browser_pilot::storage::StateStore;
use browser_pilot::terminal;
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "browser-pilot", version, about = "Drive Chrome toward a goal described in plain language")]
struct Cli {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Chat model used to choose actions
    #[arg(long, env = "BROWSER_PILOT_MODEL", default_value = config::DEFAULT_MODEL)]
    model: String,

    /// Decide/execute cycles allowed before a task fails
    #[arg(long, default_value_t = 50)]
    max_iterations: usize,

    /// Where the browser profile, session and history are kept
    #[arg(long, env = "BROWSER_PILOT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// DevTools websocket URL of a running Chrome to attach to
    #[arg(long)]
    debug_url: Option<String>,

    /// Path to the Chrome executable
    #[arg(long)]
    chrome: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("browser_pilot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let state_dir = cli.state_dir.unwrap_or_else(config::default_state_dir);
    let loop_config = LoopConfig {
        max_iterations: cli.max_iterations,
        ..LoopConfig::default()
    };
    let grace = loop_config.shutdown_grace;

    let mut browser_config = BrowserConfig::new(&state_dir);
    browser_config.headless = cli.headless;
    browser_config.debug_url = cli.debug_url;
    browser_config.chrome_path = cli.chrome;

    let mut decider_config = DeciderConfig::new(cli.api_key);
    decider_config.model = cli.model;
    decider_config.request_timeout = loop_config.request_timeout;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    let actuator: Arc<dyn Actuator> = Arc::new(
        ChromeActuator::launch(browser_config)
            .await
            .context("starting Chrome")?,
    );
    let decider = Arc::new(OpenAiDecider::new(decider_config)?);

    let (event_tx, event_rx) = events::channel();
    let printer = events::spawn_printer(event_rx);

    let mut orchestrator = TaskOrchestrator::new(decider, actuator.clone(), loop_config)
        .with_store(StateStore::new(&state_dir))
        .with_events(event_tx);
    orchestrator.import_session().await;
    if let Err(e) = orchestrator.restore() {
        warn!("could not restore the last task: {e}");
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let console = terminal::run(&mut orchestrator, stdin, &mut stdout, &cancel).await;

    if tokio::time::timeout(grace, orchestrator.persist()).await.is_err() {
        warn!("state flush did not finish within {grace:?}");
    }
    if let Err(e) = actuator.close().await {
        warn!("closing browser: {e}");
    }
    drop(orchestrator);
    printer.abort();

    console
}
