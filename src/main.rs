//! shelfgen binary entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shelfgen::channels::ws::WsHub;
use shelfgen::config::Config;
use shelfgen::engine::HttpJobSubmitter;
use shelfgen::orchestrator::{HttpReportFetcher, Orchestrator, OrchestratorConfig, OrchestratorDeps};
use shelfgen::server::{self, AppState};
use shelfgen::storage::BucketStore;
use shelfgen::translate::DerivativeClient;

#[derive(Parser)]
#[command(
    name = "shelfgen",
    version,
    about = "Orchestration server for parametric shelving regeneration"
)]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "SHELFGEN_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shelfgen=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let http = reqwest::Client::new();

    let store = Arc::new(BucketStore::new(http.clone(), &config.storage));
    let hub = Arc::new(WsHub::new());
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            engine: Arc::new(HttpJobSubmitter::new(http.clone(), &config.engine)),
            store,
            translator: Arc::new(DerivativeClient::new(http.clone(), &config.storage)),
            channel: Arc::clone(&hub) as Arc<dyn shelfgen::channels::NotificationChannel>,
            reports: Arc::new(HttpReportFetcher::new(http)),
        },
        OrchestratorConfig {
            activity_id: config.engine.activity_id.clone(),
            callback_base: config.server.callback_base_url.clone(),
            poll_timeout: config.session.poll_timeout,
        },
    ));

    let state = Arc::new(AppState { orchestrator, hub });

    server::serve(cli.bind, state).await?;
    Ok(())
}
