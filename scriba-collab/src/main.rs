//! scriba-server — standalone collaborative editing server.
//!
//! Bind address comes from `SCRIBA_ADDR` (default `127.0.0.1:9090`); log
//! verbosity from `RUST_LOG`.

use scriba_collab::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let bind_addr =
        std::env::var("SCRIBA_ADDR").unwrap_or_else(|_| "127.0.0.1:9090".to_string());
    let config = ServerConfig {
        bind_addr,
        ..ServerConfig::default()
    };

    let server = CollabServer::new(config);
    if let Err(e) = server.run().await {
        log::error!("server error: {e}");
        std::process::exit(1);
    }
}
