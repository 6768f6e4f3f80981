use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{net::TcpListener, sync::broadcast, task::JoinSet};

use crate::{
    config::RelayConfig,
    room_manager::RoomManager,
    session::{self, SessionConfig},
};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before accepting again after `accept` failed.
///
/// Errors like running out of file descriptors repeat until some connection is closed,
/// so the delay doubles with every failure in a row, up to [ACCEPT_BACKOFF_MAX].
#[derive(Debug, Default)]
struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    fn failed(&mut self) -> Duration {
        let delay = match self.current {
            Some(delay) => (delay * 2).min(ACCEPT_BACKOFF_MAX),
            None => ACCEPT_BACKOFF_MIN,
        };

        self.current = Some(delay);
        delay
    }

    fn succeeded(&mut self) {
        self.current = None;
    }
}

/// [Relay] accepts connections and hands each of them to its own session task.
///
/// It owns the [RoomManager] shared by every session.
pub struct Relay {
    listener: TcpListener,
    room_manager: Arc<RoomManager>,
    session_config: Arc<SessionConfig>,
}

impl Relay {
    /// Validates the configuration and binds the listener
    pub async fn bind(config: &RelayConfig) -> anyhow::Result<Relay> {
        config.validate().context("invalid configuration")?;

        let listener = TcpListener::bind(config.socket_addr())
            .await
            .with_context(|| format!("could not bind to {}", config.socket_addr()))?;

        Ok(Relay {
            listener,
            room_manager: Arc::new(RoomManager::new(config.delivery_grace())),
            session_config: Arc::new(SessionConfig::from(config)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn room_manager(&self) -> Arc<RoomManager> {
        Arc::clone(&self.room_manager)
    }

    /// Accept connections until `shutdown` completes,
    /// then close every open connection and wait for the sessions to finish.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let mut join_set: JoinSet<()> = JoinSet::new();
        let (quit_tx, quit_rx) = broadcast::channel::<()>(1);
        let mut backoff = AcceptBackoff::default();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    log::info!("Server interrupted. Gracefully shutting down.");
                    // no receiver left only means there is no session to notify
                    let _ = quit_tx.send(());
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        log::trace!("accepted tcp connection from {}", peer_addr);
                        backoff.succeeded();

                        join_set.spawn({
                            let room_manager = Arc::clone(&self.room_manager);
                            let session_config = Arc::clone(&self.session_config);
                            let quit_rx = quit_rx.resubscribe();

                            async move {
                                if let Err(err) = session::handle_connection(
                                    room_manager,
                                    session_config,
                                    quit_rx,
                                    socket,
                                    peer_addr,
                                )
                                .await
                                {
                                    log::debug!("{:#}", err);
                                }
                            }
                        });
                    }
                    Err(err) => {
                        let delay = backoff.failed();
                        log::warn!("failed to accept connection: {}, retrying in {:?}", err, delay);
                        tokio::time::sleep(delay).await;
                    }
                },
                // reap finished sessions so the join set does not grow with every connection
                Some(result) = join_set.join_next() => {
                    if let Err(err) = result {
                        log::error!("session task failed: {}", err);
                    }
                }
            }
        }

        while join_set.join_next().await.is_some() {}
        log::info!("Server shut down");

        Ok(())
    }
}
