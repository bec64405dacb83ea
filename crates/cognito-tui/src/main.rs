use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use cognito_core::{gateway_for, Config, Controller, ControllerConfig, Provider, SqliteChatStore};
use tracing::{error, info, warn};

mod app;
mod audio;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use audio::CpalAudio;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "cognito")]
#[command(version, about = "Themed AI chat in the terminal, with streaming answers and speech")]
struct Cli {
    /// AI provider to use for this session (gemini or ollama)
    #[arg(short, long)]
    provider: Option<String>,
    /// Model name for this session
    #[arg(short, long)]
    model: Option<String>,
    /// Directory holding the chat database
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Config as configured, with this session's command-line overrides on top.
/// The overrides are never written back to the config file.
fn session_config(config: &Config, cli: &Cli) -> Result<Config> {
    let mut session = config.clone();
    if let Some(provider) = &cli.provider {
        let provider = Provider::from_str(provider)
            .ok_or_else(|| anyhow!("Unknown provider '{}'. Use gemini or ollama", provider))?;
        session.provider = Some(provider.as_str().to_string());
        if cli.model.is_none() {
            session.default_model = None;
        }
    }
    if let Some(model) = &cli.model {
        session.default_model = Some(model.clone());
    }
    Ok(session)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging();
    info!("Starting cognito v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Could not read config, using defaults");
        Config::new()
    });

    let session = session_config(&config, &cli)?;
    let gateway = match gateway_for(&session) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "No usable AI provider");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let model_label = format!("{}: {}", session.provider().display_name(), session.model());

    let db_path = match &cli.data_dir {
        Some(dir) => dir.join("chats.db"),
        None => SqliteChatStore::default_path()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?,
    };
    let store = Arc::new(SqliteChatStore::open(&db_path)?);
    let audio = Arc::new(CpalAudio::new());

    let (controller, controller_events) =
        Controller::new(store, gateway, audio, ControllerConfig::default());

    let export_dir = dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(controller_events);
    let mut app = App::new(controller.clone(), config, events.sender(), model_label, export_dir);

    tokio::spawn({
        let controller = controller.clone();
        async move { controller.load().await }
    });

    let result = run(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    if let Err(e) = &result {
        error!(error = %e, "Exited with error");
    }
    info!("Shutting down");
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::render(app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(app, event).await?;

        if app.should_quit {
            break;
        }
    }
    Ok(())
}
