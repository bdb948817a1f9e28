use tokio::net::TcpListener;

use roomchat_server::chat::{sweep, Hub};
use roomchat_server::config::{generate_config_template, Config};
use roomchat_server::routes;
use roomchat_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roomchat_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!("roomchat server v{} starting", env!("CARGO_PKG_VERSION"));

    let room_settings = config.room_settings();
    tracing::info!(
        max_clients = room_settings.max_clients,
        idle_timeout_secs = room_settings.idle_timeout.as_secs(),
        sweep_interval_secs = room_settings.sweep_interval.as_secs(),
        "Room settings loaded"
    );

    // Room directory plus its inactivity sweep
    let sweep_interval = room_settings.sweep_interval;
    let hub = Hub::new(room_settings);
    let _sweeper = sweep::spawn_room_sweeper(hub.clone(), sweep_interval);

    // Build application state
    let app_state = AppState::new(hub, config.connection_settings());

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
