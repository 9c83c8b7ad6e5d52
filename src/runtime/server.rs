//! Server mode
//!
//! Builds the actix-web server from the prepared [`AppState`].

use actix_web::{App, HttpServer, middleware::DefaultHeaders};
use anyhow::Result;
use tracing::warn;

use crate::api::{AppState, configure_app};
use crate::config::StaticConfig;

pub async fn run_server(config: &StaticConfig, state: AppState) -> Result<()> {
    let cpu_count = config.server.cpu_count.clamp(1, 32);
    warn!("Using {} CPU cores for the server", cpu_count);

    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    let server = HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(DefaultHeaders::new().add(("X-Content-Type-Options", "nosniff")))
            .configure(move |cfg| configure_app(&state, cfg))
    })
    .keep_alive(std::time::Duration::from_secs(30))
    .client_request_timeout(std::time::Duration::from_millis(5000))
    .client_disconnect_timeout(std::time::Duration::from_millis(1000))
    .workers(cpu_count);

    warn!("Starting server at http://{}", bind_address);
    server.bind(&bind_address)?.run().await?;

    warn!("Server stopped");
    Ok(())
}
