//! TOML configuration loading for OnyNet clients and servers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;

use crate::transport::TransportConfig;

pub struct OnyNetConfig {
    /// Address to listen on, for servers.
    pub listen_address: SocketAddr,
    /// Address to dial, for clients.
    pub dial_address: Option<SocketAddr>,

    pub private_key: Option<RsaPrivateKey>,
    pub public_key: Option<RsaPublicKey>,

    pub heartbeat_tick: Duration,
    pub heartbeat_deadline: Duration,

    pub handshake_deadline: Duration,
    pub stream_poll_interval: Duration,

    pub transport: TransportConfig,
}

impl OnyNetConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: StructuredConfig =
            toml::from_str(&raw).context("failed to parse config file")?;

        let network = config.network.unwrap_or_default();
        let listen_address = network
            .listen_address
            .as_deref()
            .unwrap_or("127.0.0.1:14617")
            .parse()
            .context("invalid listen_address")?;
        let dial_address = network
            .dial_address
            .as_deref()
            .map(|addr| addr.parse())
            .transpose()
            .context("invalid dial_address")?;

        let keys = config.keys.unwrap_or_default();
        let private_key = keys
            .private_key_path
            .as_deref()
            .map(load_private_key)
            .transpose()?;
        let public_key = keys
            .public_key_path
            .as_deref()
            .map(load_public_key)
            .transpose()?;

        let heartbeat = config.heartbeat.unwrap_or_default();
        let heartbeat_tick = Duration::from_secs(heartbeat.tick_secs.unwrap_or(5));
        let heartbeat_deadline = Duration::from_secs(heartbeat.deadline_secs.unwrap_or(15));

        let handshake = config.handshake.unwrap_or_default();
        let handshake_deadline = Duration::from_secs(handshake.deadline_secs.unwrap_or(5));
        let stream_poll_interval =
            Duration::from_millis(handshake.stream_poll_interval_ms.unwrap_or(50));

        let transport_section = config.transport.unwrap_or_default();
        let mut transport = TransportConfig::default();
        if let Some(mtu) = transport_section.mtu {
            transport.mtu = mtu;
        }
        if let Some(send_window) = transport_section.send_window {
            transport.send_window = send_window;
        }
        if let Some(recv_window) = transport_section.recv_window {
            transport.recv_window = recv_window;
        }
        if let Some(nodelay) = transport_section.nodelay {
            transport.nodelay = nodelay;
        }
        if let Some(interval) = transport_section.interval {
            transport.interval = interval;
        }
        if let Some(resend) = transport_section.resend {
            transport.resend = resend;
        }
        if let Some(no_congestion_control) = transport_section.no_congestion_control {
            transport.no_congestion_control = no_congestion_control;
        }

        Ok(Self {
            listen_address,
            dial_address,
            private_key,
            public_key,
            heartbeat_tick,
            heartbeat_deadline,
            handshake_deadline,
            stream_poll_interval,
            transport,
        })
    }
}

fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read private key {}", path.display()))?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .with_context(|| format!("failed to parse private key {}", path.display()))
}

fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read public key {}", path.display()))?;
    RsaPublicKey::from_pkcs1_pem(&pem)
        .with_context(|| format!("failed to parse public key {}", path.display()))
}

#[derive(Deserialize)]
struct StructuredConfig {
    network: Option<NetworkSection>,
    keys: Option<KeysSection>,
    heartbeat: Option<HeartbeatSection>,
    handshake: Option<HandshakeSection>,
    transport: Option<TransportSection>,
}

#[derive(Deserialize, Default)]
struct NetworkSection {
    listen_address: Option<String>,
    dial_address: Option<String>,
}

#[derive(Deserialize, Default)]
struct KeysSection {
    private_key_path: Option<PathBuf>,
    public_key_path: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct HeartbeatSection {
    tick_secs: Option<u64>,
    deadline_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
struct HandshakeSection {
    deadline_secs: Option<u64>,
    stream_poll_interval_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct TransportSection {
    mtu: Option<usize>,
    send_window: Option<u16>,
    recv_window: Option<u16>,
    nodelay: Option<bool>,
    interval: Option<i32>,
    resend: Option<i32>,
    no_congestion_control: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [network]
            listen_address = "0.0.0.0:9000"
        "#;
        let parsed: StructuredConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            parsed.network.unwrap().listen_address.as_deref(),
            Some("0.0.0.0:9000")
        );
    }
}
