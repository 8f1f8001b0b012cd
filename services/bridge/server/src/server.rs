//! TCP bridge server.

use crate::{BridgeError, BridgeSession};
use esb_device::EsbDevice;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default TCP port of the bridge protocol
pub const DEFAULT_BRIDGE_PORT: u16 = 9815;

/// Default per-connection push buffer
pub const DEFAULT_LISTENER_BUFFER: usize = 16;

/// TCP bridge server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeServerConfig {
    /// Bind address
    pub listen_addr: SocketAddr,
    /// Pushed messages buffered per connection before dropping
    pub listener_buffer: usize,
}

impl Default for BridgeServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_BRIDGE_PORT)),
            listener_buffer: DEFAULT_LISTENER_BUFFER,
        }
    }
}

/// Accepts bridge clients and runs one session task per connection
#[derive(Debug)]
pub struct BridgeServer {
    config: BridgeServerConfig,
    device: Arc<EsbDevice>,
}

impl BridgeServer {
    /// Create a new bridge server for `device`
    pub fn new(config: BridgeServerConfig, device: Arc<EsbDevice>) -> Self {
        Self { config, device }
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    ///
    /// Open sessions are aborted on shutdown; their listeners are removed.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        info!("Bridge server listening on {}", listener.local_addr()?);

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Bridge server shutting down");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Failed to accept bridge connection: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }

                    info!("Bridge client {} connected", peer);
                    let session = BridgeSession::new(
                        self.device.clone(),
                        peer,
                        self.config.listener_buffer,
                    );
                    sessions.spawn(async move {
                        match session.run(stream).await {
                            Ok(()) => info!("Bridge client {} disconnected", peer),
                            Err(e) => warn!("Bridge client {} dropped: {}", peer, e),
                        }
                    });
                }

                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        sessions.shutdown().await;
        Ok(())
    }
}
