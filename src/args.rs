use btloadgen::{
    connector::ConnectorConfig,
    session::{ExpiryPolicy, RegistryConfig},
};
use clap::Parser;
use log::LevelFilter;
use std::{net::SocketAddr, time::Duration};

/// Holds BitTorrent peer connections open and keeps them busy with block requests.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Peer address pre-filled in the start dialog.
    #[arg(long, default_value = "127.0.0.1:63219")]
    pub peer_addr: String,

    /// Seconds to wait for the TCP connection.
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Seconds to wait for the peer's handshake.
    #[arg(long, default_value_t = 30)]
    pub handshake_timeout: u64,

    /// Seconds allowed for each request write and each read afterwards.
    #[arg(long, default_value_t = 5)]
    pub io_timeout: u64,

    /// Forget sessions that have been stopped for this many seconds. Kept forever when unset.
    #[arg(long)]
    pub session_ttl: Option<u64>,

    /// Run the loopback seeder on this address instead of the TUI.
    #[arg(long, value_name = "ADDR")]
    pub seed: Option<SocketAddr>,

    #[arg(long, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,
}

impl Args {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            connector: ConnectorConfig {
                connect_timeout: Duration::from_secs(self.connect_timeout),
                handshake_timeout: Duration::from_secs(self.handshake_timeout),
                write_timeout: Duration::from_secs(self.io_timeout),
                read_timeout: Duration::from_secs(self.io_timeout),
            },
            expiry: match self.session_ttl {
                Some(secs) => ExpiryPolicy::AfterStopped(Duration::from_secs(secs)),
                None => ExpiryPolicy::Never,
            },
        }
    }
}
