use clap::Parser;
use room_relay::{Relay, RelayConfig};
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::parse();
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let relay = Relay::bind(&config).await?;
    log::info!(
        "Listening on {}, rooms are served under {}/<room>",
        relay.local_addr()?,
        config.base_path.trim_end_matches('/')
    );

    relay
        .run(async move {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
        })
        .await
}
