use std::sync::Arc;

use anistream::{
    api::{self, AppState},
    config::Config,
};
use log::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr;

    let state = Arc::new(AppState::from_config(config).await);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("[main] listening on {bind_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
