use crate::network::stream::{MessageFramer, StreamChannel, StreamConfig};
use crate::session::{SessionRegistry, SocketInbound};
use crate::transport::{DuplexConfig, FullDuplexAdapter, TransportKind};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Builds the application object for each accepted connection
pub type InboundFactory = Arc<dyn Fn() -> Arc<dyn SocketInbound> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// How long a new connection has to send the open handshake
    pub handshake_timeout: Duration,
    pub max_message_size: usize,
    pub max_connections: usize,
    pub duplex: DuplexConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_message_size: StreamConfig::default().max_message_size,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            duplex: DuplexConfig::default(),
        }
    }
}

impl ServerConfig {
    fn handshake_stream_config(&self) -> StreamConfig {
        StreamConfig {
            max_message_size: self.max_message_size,
            read_timeout: self.handshake_timeout,
            ..StreamConfig::default()
        }
    }

    /// After the handshake the session's own heartbeat decides liveness; the
    /// read timeout only catches peers that outlive it.
    fn session_stream_config(&self) -> StreamConfig {
        StreamConfig {
            max_message_size: self.max_message_size,
            read_timeout: self.duplex.heartbeat_interval
                + self.duplex.timeout
                + self.handshake_timeout,
            ..StreamConfig::default()
        }
    }
}

/// TCP server running each accepted socket as a full-duplex session
pub struct SocketServer {
    listener: TcpListener,
    registry: SessionRegistry,
    inbound_factory: InboundFactory,
    config: ServerConfig,
}

impl SocketServer {
    pub async fn bind(
        config: ServerConfig,
        registry: SessionRegistry,
        inbound_factory: InboundFactory,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind server to address: {}", config.bind_addr))?;

        info!(
            addr = %config.bind_addr,
            max_connections = config.max_connections,
            "Server bound"
        );

        Ok(Self {
            listener,
            registry,
            inbound_factory,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read server local address")
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Accept connections until the process exits
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes, then disconnect every
    /// session.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(addr = ?self.listener.local_addr()?, "Starting server");
        tokio::pin!(shutdown);

        let mut active_connections: HashMap<usize, JoinHandle<()>> = HashMap::new();
        let mut connection_counter = 0usize;

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => break,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            active_connections.retain(|id, handle| {
                if handle.is_finished() {
                    debug!(connection_id = id, "Cleaning up completed connection");
                    false
                } else {
                    true
                }
            });

            if active_connections.len() >= self.config.max_connections {
                warn!(
                    limit = self.config.max_connections,
                    peer = %peer_addr,
                    "Connection limit reached, rejecting connection"
                );
                // Dropping the stream closes it
                continue;
            }

            connection_counter += 1;
            let connection_id = connection_counter;
            info!(connection_id, peer = %peer_addr, "Accepted connection");

            let registry = self.registry.clone();
            let inbound_factory = Arc::clone(&self.inbound_factory);
            let config = self.config.clone();

            let handle = task::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, registry, inbound_factory, config, connection_id)
                        .await
                {
                    error!(connection_id, error = %e, "Connection failed");
                }
            });
            active_connections.insert(connection_id, handle);
        }

        info!(
            active = active_connections.len(),
            "Shutting down server"
        );
        self.registry.shutdown().await;
        for (_, handle) in active_connections {
            handle.abort();
        }
        Ok(())
    }

    /// Drive one socket: read messages into the adapter until either side
    /// closes.
    #[instrument(skip(stream, registry, inbound_factory, config), fields(connection_id = connection_id))]
    async fn handle_connection(
        stream: TcpStream,
        registry: SessionRegistry,
        inbound_factory: InboundFactory,
        config: ServerConfig,
        connection_id: usize,
    ) -> Result<()> {
        stream
            .set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;
        let (mut reader, writer) = stream.into_split();

        let handshake_framer = MessageFramer::new(config.handshake_stream_config());
        let session_framer = MessageFramer::new(config.session_stream_config());

        let session = registry.create_session(Some(inbound_factory()));
        let channel = Arc::new(StreamChannel::new(writer, session_framer.clone()));
        let adapter = FullDuplexAdapter::new(
            TransportKind::WebSocket,
            &session,
            channel,
            config.duplex.clone(),
        );
        debug!(session_id = %session.id(), "Session created for connection");

        loop {
            let framer = if adapter.is_open() {
                &session_framer
            } else {
                &handshake_framer
            };
            match framer.read_message(&mut reader).await {
                Ok(message) => {
                    adapter.on_channel_message(message).await;
                    if adapter.is_closed() {
                        debug!("Adapter closed, ending connection");
                        break;
                    }
                }
                Err(e) if e.is_disconnect() => {
                    info!("Connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Error reading from connection");
                    break;
                }
            }
        }

        adapter.on_channel_closed().await;
        // A session that never completed the handshake is still registered
        if registry.remove_session(session.id()).is_some() {
            session.on_connect(None).await;
        }
        Ok(())
    }
}
