//! Broadcast chat server - entry point

use std::env;

use tracing_subscriber::EnvFilter;

use chat_relay::{ChatServer, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG to control log level, e.g. RUST_LOG=chat_relay=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    // Port from command line or default
    let port = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_PORT,
    };

    let server = ChatServer::bind(port).await?;
    server.run().await?;
    Ok(())
}
