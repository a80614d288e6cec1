use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rsa::RsaPrivateKey;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use yamux::Mode;

use crate::client::HandshakeTiming;
use crate::config::OnyNetConfig;
use crate::error::OnyNetError;
use crate::multiplex::manager::DEFAULT_ATTEMPT_TIMEOUT;
use crate::multiplex::{Manager, Stream};
use crate::transport::{self, TransportConfig};
use crate::{auth, heartbeat};

const HEARTBEAT_STREAM_NAME: &str = "heartbeatStream";
const HEARTBEAT_STREAM_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// A single accepted, (optionally) authenticated peer connection.
pub struct ClientConn {
    id: u64,
    peer_addr: SocketAddr,
    manager: Manager,
    cancel: CancellationToken,
}

impl ClientConn {
    /// The monotonically-assigned id this connection was registered under.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.manager.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.manager.remote_addr()
    }

    pub async fn open_stream(&mut self, name: &str, timeout: Duration) -> Result<Stream, OnyNetError> {
        self.manager
            .open_stream(name, timeout)
            .await
            .map_err(OnyNetError::Stream)
    }

    pub async fn accept_stream(&mut self, name: &str, timeout: Duration) -> Result<Stream, OnyNetError> {
        self.manager
            .accept_stream(name, timeout)
            .await
            .map_err(OnyNetError::Stream)
    }

    pub async fn close(&mut self) -> Result<(), OnyNetError> {
        self.cancel.cancel();
        self.manager.close().await.map_err(OnyNetError::Stream)
    }
}

/// The server-side table of currently connected clients, keyed by a
/// monotonic id handed out at accept time.
#[derive(Clone, Default)]
pub struct ClientTable {
    clients: Arc<RwLock<HashMap<u64, Arc<RwLock<ClientConn>>>>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, client: ClientConn) -> Arc<RwLock<ClientConn>> {
        let id = client.id();
        let handle = Arc::new(RwLock::new(client));
        self.clients.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    /// Removes and returns a client connection by id, if still present.
    pub async fn remove(&self, id: u64) -> Option<Arc<RwLock<ClientConn>>> {
        self.clients.write().await.remove(&id)
    }

    /// Looks up a client connection by id without removing it.
    pub async fn get(&self, id: u64) -> Option<Arc<RwLock<ClientConn>>> {
        self.clients.read().await.get(&id).cloned()
    }

    /// Returns a shallow snapshot of all currently connected clients, so
    /// callers never hold the table's lock while iterating.
    pub async fn all(&self) -> Vec<Arc<RwLock<ClientConn>>> {
        self.clients.read().await.values().cloned().collect()
    }
}

/// Listens for and authenticates incoming OnyNet connections.
pub struct Server {
    listener: transport::Listener,
    private_key: Option<RsaPrivateKey>,
    clients: ClientTable,
    cancel: CancellationToken,
    timing: HandshakeTiming,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        private_key: Option<RsaPrivateKey>,
        transport_config: TransportConfig,
        parent: &CancellationToken,
    ) -> Result<Self, OnyNetError> {
        Self::bind_with_timing(addr, private_key, transport_config, HandshakeTiming::default(), parent).await
    }

    /// Loads listen settings straight out of an [`OnyNetConfig`].
    pub async fn bind_with_config(
        config: &OnyNetConfig,
        parent: &CancellationToken,
    ) -> Result<Self, OnyNetError> {
        let timing = HandshakeTiming {
            handshake_deadline: config.handshake_deadline,
            stream_poll_interval: config.stream_poll_interval,
            heartbeat_tick: config.heartbeat_tick,
            heartbeat_deadline: config.heartbeat_deadline,
        };
        Self::bind_with_timing(
            config.listen_address,
            config.private_key.clone(),
            config.transport,
            timing,
            parent,
        )
        .await
    }

    pub async fn bind_with_timing(
        addr: SocketAddr,
        private_key: Option<RsaPrivateKey>,
        transport_config: TransportConfig,
        timing: HandshakeTiming,
        parent: &CancellationToken,
    ) -> Result<Self, OnyNetError> {
        let cancel = parent.child_token();
        let listener = transport::Listener::bind(addr, transport_config, cancel.clone())
            .await
            .map_err(OnyNetError::NewServer)?;

        Ok(Self {
            listener,
            private_key,
            clients: ClientTable::new(),
            cancel,
            timing,
        })
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts the next client connection, running the mutual-auth
    /// handshake and heartbeat stream setup before returning it.
    pub async fn accept(&mut self) -> Result<Arc<RwLock<ClientConn>>, OnyNetError> {
        let (mut connection, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(OnyNetError::AcceptClient)?;
        let local_addr = connection
            .local_addr()
            .map_err(|e| OnyNetError::AcceptClient(crate::error::TransportError::Io(e)))?;

        let aes_key = if let Some(private_key) = &self.private_key {
            let aes_key = auth::authorize_client(&mut connection, private_key, self.timing.handshake_deadline)
                .await
                .map_err(OnyNetError::Auth)?;
            auth::authorize_self_server(&mut connection, private_key, self.timing.handshake_deadline)
                .await
                .map_err(OnyNetError::Auth)?;
            Some(aes_key)
        } else {
            None
        };

        let conn_cancel = self.cancel.child_token();
        let mut manager = Manager::with_timing(
            connection,
            Mode::Server,
            aes_key,
            conn_cancel.clone(),
            local_addr,
            peer_addr,
            self.timing.stream_poll_interval,
            DEFAULT_ATTEMPT_TIMEOUT,
        );

        let mut heartbeat_stream = manager
            .accept_stream(HEARTBEAT_STREAM_NAME, HEARTBEAT_STREAM_TIMEOUT)
            .await
            .map_err(OnyNetError::HeartbeatStream)?;

        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let client_conn = ClientConn {
            id,
            peer_addr,
            manager,
            cancel: conn_cancel.clone(),
        };

        let heartbeat_cancel = conn_cancel.clone();
        let clients = self.clients.clone();
        let heartbeat_tick = self.timing.heartbeat_tick;
        let heartbeat_deadline = self.timing.heartbeat_deadline;
        tokio::spawn(async move {
            if let Err(err) = heartbeat::receive_heartbeat_with_timing(
                &mut heartbeat_stream,
                &heartbeat_cancel,
                heartbeat_tick,
                heartbeat_deadline,
            )
            .await
            {
                log::debug!("server: closing client {id} because of heartbeat error: {err}");
                heartbeat_cancel.cancel();
                if let Some(conn) = clients.remove(id).await {
                    conn.write().await.close().await.ok();
                }
            }
            let _ = heartbeat_stream.close().await;
        });

        Ok(self.clients.insert(client_conn).await)
    }

    pub async fn close(&mut self) -> Result<(), OnyNetError> {
        self.cancel.cancel();
        Ok(())
    }
}
