//! Voxline entrypoint

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use voxline::agent::openai::OpenAiProvider;
use voxline::agent::SessionConfig;
use voxline::config::Config;
use voxline::notifications::NotificationService;
use voxline::server::{self, AppState, SessionRegistry};
use voxline::speech::stt::DeepgramStt;
use voxline::speech::tts::DeepgramTts;
use voxline::storage::CallStore;
use voxline::telephony::TwilioAdapter;

#[derive(Parser)]
#[command(name = "voxline", version, about = "Bilingual AI voice receptionist")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { bind } => {
            tracing::info!(
                environment = config.app_env.as_str(),
                database = config.database_path(),
                "starting voxline"
            );
            let store = CallStore::open(config.database_path()).await?;
            let notifications = Arc::new(NotificationService::from_config(&config));
            let sessions = Arc::new(
                SessionRegistry::new(
                    Arc::new(DeepgramStt::from_config(&config)),
                    Arc::new(OpenAiProvider::from_config(&config)),
                    Arc::new(DeepgramTts::from_config(&config)),
                    store.clone(),
                    notifications.clone(),
                    SessionConfig::default(),
                )
                .with_telephony(Arc::new(TwilioAdapter::from_config(&config))),
            );
            let state = AppState::new(Arc::new(config), store, notifications, sessions);
            server::start(state, &bind).await
        }
    }
}
