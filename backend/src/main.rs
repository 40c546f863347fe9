use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{middleware, Router};
use rand::RngCore;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pressurize_backend::auth::TokenValidator;
use pressurize_backend::store::SqliteStore;
use pressurize_backend::{logging, routes, AppState, Config};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "\
Usage:
  pressurize [--config <path>]
  pressurize [--config <path>] create-token <key> <lifetime_secs> [secret]
  pressurize --version";

enum Command {
    Serve,
    CreateToken {
        key: String,
        lifetime_secs: i64,
        secret: Option<String>,
    },
}

struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut config = None;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            _ => rest.push(arg.as_str()),
        }
    }

    let command = match rest.as_slice() {
        [] => Command::Serve,
        ["create-token", key, lifetime, secret @ ..] if secret.len() <= 1 => {
            let lifetime_secs = lifetime
                .parse()
                .map_err(|_| format!("invalid lifetime '{}'", lifetime))?;
            Command::CreateToken {
                key: key.to_string(),
                lifetime_secs,
                secret: secret.first().map(|s| s.to_string()),
            }
        }
        other => return Err(format!("unexpected arguments: {}", other.join(" "))),
    };

    Ok(Args { config, command })
}

fn random_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn create_token(
    config: &Config,
    key: &str,
    lifetime_secs: i64,
    secret: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::new(
        &config.database.url,
        &config.deployment.table_name("auth"),
        &config.deployment.table_name("cache"),
    )?;
    let secret = secret.unwrap_or_else(random_secret);
    let token = TokenValidator::new(Arc::new(store)).create_token(key, &secret, lifetime_secs)?;

    println!("auth_token_key: {}", token.key);
    println!("auth_secret: {}", token.secret);
    println!("expires: {}", token.expires);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("pressurize {}", VERSION);
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let args = parse_args(&args).map_err(|e| format!("{}\n\n{}", e, USAGE))?;

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Command::CreateToken {
        key,
        lifetime_secs,
        secret,
    } = args.command
    {
        return create_token(&config, &key, lifetime_secs, secret);
    }

    tracing::info!(
        "Starting pressurize {} for deployment {} ({} models)",
        VERSION,
        config.deployment.name,
        config.models.len()
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::from_config(config)?);
    for model in state.registry.models() {
        tracing::info!("Serving model {} from {}", model.name, model.host);
    }

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .merge(routes::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
