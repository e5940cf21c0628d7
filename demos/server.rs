//! Example server: loads settings from env (and an optional JSON file), builds the configured store,
//! mounts common routes at the root and notification routes under the API prefix.

use notification_api::{common_routes, load_config, notification_routes, AppState};
use axum::Router;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("notification_api=info".parse()?))
        .init();

    let config = load_config().await?;
    let listen_addr = config.listen_addr.clone();
    let api_prefix = config.api_prefix.clone();
    let state = AppState::from_config(config).await?;

    let api = notification_routes(state.clone());
    let app = Router::new().merge(common_routes(state));
    let app = if api_prefix.is_empty() || api_prefix == "/" {
        app.merge(api)
    } else {
        app.nest(&api_prefix, api)
    };

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
