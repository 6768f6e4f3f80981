use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use clap::Parser;
use comms::transport::server::AcceptConfig;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BASE_PATH: &str = "/ws";
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DELIVERY_GRACE_MILLIS: u64 = 2000;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("base path '{0}' must start with '/'")]
    RelativeBasePath(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("ping interval ({ping_interval}s) must be shorter than the idle timeout ({idle_timeout}s)")]
    PingInterval { ping_interval: u64, idle_timeout: u64 },
}

/// Relays text messages between the members of named rooms
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct RelayConfig {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Rooms are joined by connecting to `<base path>/<room key>`
    #[arg(long, env = "RELAY_BASE_PATH", default_value = DEFAULT_BASE_PATH)]
    pub base_path: String,

    /// Largest message a client may send, in bytes
    #[arg(long, env = "RELAY_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Messages queued for a single member before broadcasts to it start waiting
    #[arg(long, env = "RELAY_OUTBOUND_QUEUE_CAPACITY", default_value_t = DEFAULT_OUTBOUND_QUEUE_CAPACITY)]
    pub outbound_queue_capacity: usize,

    /// How long a broadcast waits on a member with a full queue before evicting it as too slow
    #[arg(long, env = "RELAY_DELIVERY_GRACE_MILLIS", default_value_t = DEFAULT_DELIVERY_GRACE_MILLIS)]
    pub delivery_grace_millis: u64,

    /// Connections which send nothing, not even a pong, for this long are closed
    #[arg(long, env = "RELAY_IDLE_TIMEOUT_SECS", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,

    /// How often the relay pings each connection, the pongs keep listening clients from going idle
    #[arg(long, env = "RELAY_PING_INTERVAL_SECS", default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    pub ping_interval_secs: u64,

    /// Longest a single write to a member may take before the member is dropped
    #[arg(long, env = "RELAY_SEND_TIMEOUT_SECS", default_value_t = DEFAULT_SEND_TIMEOUT_SECS)]
    pub send_timeout_secs: u64,

    /// Longest a client may take to complete the websocket handshake
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT_SECS", default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    pub handshake_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            base_path: String::from(DEFAULT_BASE_PATH),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            delivery_grace_millis: DEFAULT_DELIVERY_GRACE_MILLIS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::RelativeBasePath(self.base_path.clone()));
        }

        for (name, value) in [
            ("max message size", self.max_message_size as u64),
            ("outbound queue capacity", self.outbound_queue_capacity as u64),
            ("delivery grace", self.delivery_grace_millis),
            ("idle timeout", self.idle_timeout_secs),
            ("ping interval", self.ping_interval_secs),
            ("send timeout", self.send_timeout_secs),
            ("handshake timeout", self.handshake_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.ping_interval_secs >= self.idle_timeout_secs {
            return Err(ConfigError::PingInterval {
                ping_interval: self.ping_interval_secs,
                idle_timeout: self.idle_timeout_secs,
            });
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn accept_config(&self) -> AcceptConfig {
        AcceptConfig {
            base_path: self.base_path.clone(),
            max_message_size: self.max_message_size,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn delivery_grace(&self) -> Duration {
        Duration::from_millis(self.delivery_grace_millis)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}
