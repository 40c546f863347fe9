use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pressurize_runner::{api, AppState, Config};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("pressurize-runner {}", VERSION);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }
    let config_path = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .map(|i| {
            args.get(i + 1)
                .map(PathBuf::from)
                .ok_or("--config needs a path")
        })
        .transpose()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load(config_path.as_deref())
        .map_err(|e| format!("Failed to load configuration: {}", e))?;
    for model in &config.models {
        tracing::info!(
            "Serving model {} with methods {:?}",
            model.name,
            model.methods.keys().collect::<Vec<_>>()
        );
    }

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let app = api::app(Arc::new(AppState::new(config)));

    // Start server
    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
