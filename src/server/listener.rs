//! Feed server listener
//!
//! Runs the event loop: wait until the listener or any connection socket is
//! ready (or the poll interval passes), step every connection, then accept
//! at most one new client. All of it on the calling task.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::{TcpListener, TcpStream};

use super::config::ServerConfig;
use super::dispatch::Dispatcher;
use crate::error::Result;
use crate::registry::StreamRegistry;

/// Single-threaded streaming server
pub struct FeedServer {
    listener: TcpListener,
    dispatcher: Dispatcher<TcpStream>,
}

impl FeedServer {
    /// Bind the listening socket. The registry must already be prepared.
    ///
    /// If the config names a status path that the registry does not have
    /// yet, it is registered here.
    pub async fn bind(config: ServerConfig, mut registry: StreamRegistry) -> Result<Self> {
        if let Some(path) = &config.status_path {
            if registry.lookup(path).is_none() {
                registry.register_status(path.clone())?;
            }
        }

        let listener = TcpListener::bind(config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Feed server listening");

        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(config, registry),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &StreamRegistry {
        self.dispatcher.registry()
    }

    /// Run the server
    ///
    /// This method only returns on a listener failure.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let poll_interval = self.dispatcher.config().poll_interval;

        loop {
            let accepted = {
                let ready: FuturesUnordered<_> = self
                    .dispatcher
                    .interests()
                    .map(|(stream, interest)| stream.ready(interest))
                    .collect();

                tokio::select! {
                    _ = &mut shutdown => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    result = self.listener.accept() => Some(result),
                    _ = first_ready(ready) => None,
                    _ = tokio::time::sleep(poll_interval) => None,
                }
            };

            let now = Instant::now();
            self.dispatcher.dispatch(now);

            match accepted {
                Some(Ok((socket, peer))) => self.admit(socket, peer, now),
                Some(Err(e)) => tracing::error!(error = %e, "Failed to accept connection"),
                None => {}
            }
        }

        self.dispatcher.shutdown();
        Ok(())
    }

    fn admit(&mut self, socket: TcpStream, peer: SocketAddr, now: Instant) {
        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }
        self.dispatcher.admit(socket, peer, now);
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.dispatcher.config().tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

/// Resolves when any socket is ready; never, if there are none
async fn first_ready<F: Future>(mut ready: FuturesUnordered<F>) {
    if ready.is_empty() {
        std::future::pending::<()>().await;
    }
    let _ = ready.next().await;
}
