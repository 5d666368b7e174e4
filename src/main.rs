use clap::Parser;
use tracing_subscriber::EnvFilter;
use webrtc_rooms::config::{Cli, Command};
use webrtc_rooms::server::SignalingServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Serve(config) => {
            let server = SignalingServer::bind(&config).await?;
            tokio::select! {
                result = server.run() => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down signaling server"),
            }
        }
        Command::Join(config) => webrtc_rooms::client::run(config).await?,
    }

    Ok(())
}
