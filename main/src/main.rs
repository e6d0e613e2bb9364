use api_router::{api_routes, api_state::ApiState};
use common::corpus::CorpusKey;
use common::utils::config::get_config;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let state = ApiState::new(&config).await?;

    // Warm the dataset cache so the first question does not pay the load.
    // A corpus that cannot load is reported and skipped; requests touching
    // it will retry the load and surface the error themselves.
    for key in CorpusKey::ALL {
        match state.catalog.ensure(key).await {
            Ok(entry) => info!(corpus = %key, chunks = entry.len(), "Dataset warmed"),
            Err(e) => error!(corpus = %key, error = %e, "Dataset warmup failed"),
        }
    }

    let app = api_routes(state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
