//! Server settings.
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;

/// Standard Bolt port.
pub const DEFAULT_PORT: u16 = 7687;

/// Plain settings object handed to [`BoltServer`](crate::protocol::BoltServer)
/// at construction. The executor and authenticator are injected separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free port.
    pub address: SocketAddr,
    /// Connections served at once; later ones wait until a worker frees up.
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Largest message a client may send; larger ones close the connection.
    pub max_message_size: usize,
    /// Log every RUN with its user and peer address.
    pub log_queries: bool,
    /// Without an authenticator, refuse HELLO instead of admitting everyone,
    /// and refuse RUN on connections that have not said HELLO.
    pub require_auth: bool,
    /// Accept the `none` scheme, granting the viewer role.
    pub allow_anonymous: bool,
    /// PULL batches its writes when it emits more records than this.
    pub record_batch_threshold: usize,
    /// After a FAILURE, answer IGNORED to everything but RESET and GOODBYE
    /// until the client sends RESET.
    pub ignore_after_failure: bool,
    /// Reported as `server` in the HELLO reply.
    pub server_agent: String,
    /// Reported as `db` when a result stream completes.
    pub database_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 100,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            log_queries: false,
            require_auth: false,
            allow_anonymous: false,
            record_batch_threshold: 50,
            ignore_after_failure: false,
            server_agent: concat!("boltwire/", env!("CARGO_PKG_VERSION")).to_string(),
            database_name: "neo4j".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults bound to an ephemeral loopback port.
    pub fn local() -> Self {
        Self {
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 7687);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
        assert!(!config.require_auth);
        assert!(config.server_agent.starts_with("boltwire/"));
    }
}
