use std::net::SocketAddr;
use std::time::Duration;

use rsa::RsaPublicKey;
use tokio_util::sync::CancellationToken;
use yamux::Mode;

use crate::config::OnyNetConfig;
use crate::error::OnyNetError;
use crate::multiplex::manager::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::multiplex::{Manager, Stream};
use crate::transport::{self, TransportConfig};
use crate::{auth, heartbeat};

const HEARTBEAT_STREAM_NAME: &str = "heartbeatStream";
const HEARTBEAT_STREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing knobs threaded down from [`OnyNetConfig`] into the handshake and
/// named-stream retry loop.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeTiming {
    pub handshake_deadline: Duration,
    pub stream_poll_interval: Duration,
    pub heartbeat_tick: Duration,
    pub heartbeat_deadline: Duration,
}

impl Default for HandshakeTiming {
    fn default() -> Self {
        Self {
            handshake_deadline: auth::DEFAULT_HANDSHAKE_TIMEOUT,
            stream_poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_tick: heartbeat::DEFAULT_TICK_INTERVAL,
            heartbeat_deadline: heartbeat::DEFAULT_ROUND_TRIP_DEADLINE,
        }
    }
}

/// A connection to an OnyNet server, from the dialing side.
///
/// `Client` and [`crate::server::ClientConn`] both wrap the same underlying
/// machinery; the split mirrors the reference implementation's distinction
/// between the struct you hold after dialing versus the one the server hands
/// you after accepting.
pub struct Client {
    manager: Manager,
    cancel: CancellationToken,
}

impl Client {
    /// Dials `addr`, optionally performing the mutual-auth handshake when
    /// `public_key` is provided, and opens the heartbeat stream.
    pub async fn dial(
        addr: SocketAddr,
        public_key: Option<&RsaPublicKey>,
        transport_config: TransportConfig,
        parent: &CancellationToken,
    ) -> Result<Self, OnyNetError> {
        Self::dial_with_timing(addr, public_key, transport_config, HandshakeTiming::default(), parent).await
    }

    /// Loads connection settings straight out of an [`OnyNetConfig`].
    pub async fn dial_with_config(
        config: &OnyNetConfig,
        parent: &CancellationToken,
    ) -> Result<Self, OnyNetError> {
        let addr = config
            .dial_address
            .ok_or_else(|| OnyNetError::Config(anyhow::anyhow!("config has no dial_address")))?;
        let timing = HandshakeTiming {
            handshake_deadline: config.handshake_deadline,
            stream_poll_interval: config.stream_poll_interval,
            heartbeat_tick: config.heartbeat_tick,
            heartbeat_deadline: config.heartbeat_deadline,
        };
        Self::dial_with_timing(addr, config.public_key.as_ref(), config.transport, timing, parent).await
    }

    pub async fn dial_with_timing(
        addr: SocketAddr,
        public_key: Option<&RsaPublicKey>,
        transport_config: TransportConfig,
        timing: HandshakeTiming,
        parent: &CancellationToken,
    ) -> Result<Self, OnyNetError> {
        let cancel = parent.child_token();

        let mut connection = transport::dial(addr, transport_config, cancel.clone())
            .await
            .map_err(OnyNetError::Dial)?;
        let local_addr = connection.local_addr().map_err(|e| OnyNetError::Dial(crate::error::TransportError::Io(e)))?;
        let remote_addr = connection.peer_addr().map_err(|e| OnyNetError::Dial(crate::error::TransportError::Io(e)))?;

        let aes_key = if let Some(public_key) = public_key {
            let aes_key = auth::authorize_self_client(&mut connection, public_key, timing.handshake_deadline)
                .await
                .map_err(OnyNetError::Auth)?;
            auth::authorize_server(&mut connection, public_key, timing.handshake_deadline)
                .await
                .map_err(OnyNetError::Auth)?;
            Some(aes_key)
        } else {
            None
        };

        let mut manager = Manager::with_timing(
            connection,
            Mode::Client,
            aes_key,
            cancel.clone(),
            local_addr,
            remote_addr,
            timing.stream_poll_interval,
            DEFAULT_ATTEMPT_TIMEOUT,
        );

        let mut heartbeat_stream = manager
            .open_stream(HEARTBEAT_STREAM_NAME, HEARTBEAT_STREAM_TIMEOUT)
            .await
            .map_err(OnyNetError::HeartbeatStream)?;

        let heartbeat_cancel = cancel.clone();
        let heartbeat_tick = timing.heartbeat_tick;
        let heartbeat_deadline = timing.heartbeat_deadline;
        tokio::spawn(async move {
            if let Err(err) = heartbeat::send_heartbeat_with_timing(
                &mut heartbeat_stream,
                &heartbeat_cancel,
                heartbeat_tick,
                heartbeat_deadline,
            )
            .await
            {
                log::debug!("client: closing because of heartbeat error: {err}");
                // `heartbeat_cancel` is a clone of the same token the manager's
                // session driver watches, so cancelling it here tears down the
                // whole connection, not just this stream.
                heartbeat_cancel.cancel();
            }
            let _ = heartbeat_stream.close().await;
        });

        Ok(Self { manager, cancel })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.manager.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.manager.remote_addr()
    }

    /// Opens a named stream to the server.
    pub async fn open_stream(&mut self, name: &str, timeout: Duration) -> Result<Stream, OnyNetError> {
        self.manager
            .open_stream(name, timeout)
            .await
            .map_err(OnyNetError::Stream)
    }

    /// Accepts an incoming named stream from the server.
    pub async fn accept_stream(&mut self, name: &str, timeout: Duration) -> Result<Stream, OnyNetError> {
        self.manager
            .accept_stream(name, timeout)
            .await
            .map_err(OnyNetError::Stream)
    }

    /// Tears down the connection and cancels everything derived from it.
    pub async fn close(&mut self) -> Result<(), OnyNetError> {
        self.cancel.cancel();
        self.manager.close().await.map_err(OnyNetError::Stream)
    }
}
