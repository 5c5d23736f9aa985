use artboard_collab::server::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    let bind_addr = std::env::var("ARTBOARD_RELAY_ADDR").unwrap_or_else(|_| "127.0.0.1:9090".to_string());
    let server = RelayServer::new(RelayConfig {
        bind_addr,
        ..RelayConfig::default()
    });

    log::info!("Starting artboard relay on {}", server.bind_addr());
    if let Err(e) = server.run().await {
        log::error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}
