//! Broadcast chat client - entry point
//!
//! Connects to the server, prints every broadcast line, and forwards
//! console input. Type `quit` to leave.

use std::env;

use tracing_subscriber::EnvFilter;

use chat_relay::{ChatClient, DEFAULT_HOST, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    // Host and port from command line or defaults
    let host = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match env::args().nth(2) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_PORT,
    };

    let client = ChatClient::new(host, port);
    client.run().await?;
    Ok(())
}
