use crate::{
    handshake::{generate_peer_id, parse_info_hash, Handshake, InfoHashError},
    messages::{Message, Request, BLOCK_LEN},
    signal::StopSignal,
};
use log::{debug, info, trace};
use std::{
    convert::Infallible,
    fmt::Display,
    future::Future,
    io,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};

/// Throughput is sampled and published once per this period.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

const READ_BUF_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub connect_timeout: Duration,
    /// Covers sending our handshake, reading theirs and sending `interested`.
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub enum ConnectorError {
    InvalidInfoHash(InfoHashError),
    MissingPeerAddr,
    Connect(io::Error),
    Handshake(io::Error),
    Transfer(io::Error),
}

impl Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInfoHash(e) => write!(f, "invalid info hash: {e}"),
            Self::MissingPeerAddr => write!(f, "peer address is empty"),
            Self::Connect(e) => write!(f, "failed to connect to peer: {e}"),
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Transfer(e) => write!(f, "transfer failed: {e}"),
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidInfoHash(e) => Some(e),
            Self::MissingPeerAddr => None,
            Self::Connect(e) | Self::Handshake(e) | Self::Transfer(e) => Some(e),
        }
    }
}

impl From<InfoHashError> for ConnectorError {
    fn from(value: InfoHashError) -> Self {
        ConnectorError::InvalidInfoHash(value)
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

/// Runs `fut` unless the signal fires first. `None` means we were cancelled.
async fn or_cancelled<F: Future>(signal: &StopSignal, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = signal.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Connects to `peer_addr`, handshakes for `info_hash` and then keeps asking for
/// the same 16KB block until `signal` fires or the connection breaks. The most
/// recent KB/s sample is published through `speed`.
///
/// Returns `Ok(())` when cancelled. The connection is owned by this call and is
/// closed whichever way it returns.
pub async fn connect_peer_with_stop(
    peer_addr: &str,
    info_hash: &str,
    signal: &StopSignal,
    speed: &AtomicU64,
    config: &ConnectorConfig,
) -> Result<(), ConnectorError> {
    if peer_addr.is_empty() {
        return Err(ConnectorError::MissingPeerAddr);
    }
    let info_hash = parse_info_hash(info_hash)?;

    info!("Attempting to connect to peer: {peer_addr}");
    let connect = timeout(config.connect_timeout, TcpStream::connect(peer_addr));
    let mut stream = match or_cancelled(signal, connect).await {
        None => {
            info!("Cancelled while connecting to {peer_addr}");
            return Ok(());
        }
        Some(Err(_)) => return Err(ConnectorError::Connect(timed_out("connect"))),
        Some(Ok(Err(e))) => return Err(ConnectorError::Connect(e)),
        Some(Ok(Ok(s))) => s,
    };

    let mut buf = vec![0u8; READ_BUF_LEN];
    let handshake_msg = Handshake::new(info_hash, generate_peer_id()).serialize_handshake();
    let setup = timeout(
        config.handshake_timeout,
        open_session(&mut stream, &handshake_msg, &mut buf),
    );
    match or_cancelled(signal, setup).await {
        None => {
            info!("Cancelled during handshake with {peer_addr}");
            return Ok(());
        }
        Some(Err(_)) => return Err(ConnectorError::Handshake(timed_out("handshake"))),
        Some(Ok(Err(e))) => return Err(ConnectorError::Handshake(e)),
        Some(Ok(Ok(n))) => info!("Received handshake response from {peer_addr}: {n} bytes"),
    }

    info!("Starting download simulation for {peer_addr}");
    let downloaded = AtomicU64::new(0);
    let result = tokio::select! {
        biased;
        _ = signal.cancelled() => Ok(()),
        res = request_loop(&mut stream, &mut buf, &downloaded, peer_addr, config) => res,
        never = sample_throughput(&downloaded, speed) => match never {},
    };

    match &result {
        Ok(()) => info!("Stopping connection to {peer_addr}"),
        Err(e) => debug!("Connection to {peer_addr} ended: {e}"),
    }
    result
}

/// Sends our handshake, waits for any response and declares interest.
async fn open_session(
    stream: &mut TcpStream,
    handshake_msg: &[u8],
    buf: &mut [u8],
) -> io::Result<usize> {
    stream.write_all(handshake_msg).await?;
    debug!("Handshake sent to {:?}", stream.peer_addr().ok());

    // content is not checked, the peer only has to say something
    let n = stream.read(buf).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed the connection before answering the handshake",
        ));
    }

    let len = Message::Interested.create(buf)?;
    stream.write_all(&buf[..len]).await?;
    Ok(n)
}

/// Steady state: request block 0 of piece 0, read whatever comes back, repeat.
/// Only returns on a fatal error; read timeouts are retried.
async fn request_loop(
    stream: &mut TcpStream,
    buf: &mut [u8],
    downloaded: &AtomicU64,
    peer_addr: &str,
    config: &ConnectorConfig,
) -> Result<(), ConnectorError> {
    let mut request = [0u8; 17];
    Message::Request(Request {
        index: 0,
        begin: 0,
        length: BLOCK_LEN,
    })
    .create(&mut request)
    .map_err(ConnectorError::Transfer)?;

    loop {
        match timeout(config.write_timeout, stream.write_all(&request)).await {
            Err(_) => return Err(ConnectorError::Transfer(timed_out("request write"))),
            Ok(Err(e)) => return Err(ConnectorError::Transfer(e)),
            Ok(Ok(())) => {}
        }

        match timeout(config.read_timeout, stream.read(buf)).await {
            Err(_) => {
                debug!("Read timeout for {peer_addr}, continuing...");
            }
            Ok(Ok(0)) => {
                return Err(ConnectorError::Transfer(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )));
            }
            Ok(Ok(n)) => {
                downloaded.fetch_add(n as u64, Ordering::Relaxed);
            }
            Ok(Err(e)) => return Err(ConnectorError::Transfer(e)),
        }
    }
}

/// Every `SAMPLE_INTERVAL`, moves the byte counter into `speed` as KB/s.
/// Never returns; it is dropped together with the request loop.
async fn sample_throughput(downloaded: &AtomicU64, speed: &AtomicU64) -> Infallible {
    let mut ticker = interval_at(Instant::now() + SAMPLE_INTERVAL, SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let bytes = downloaded.swap(0, Ordering::Relaxed);
        let kbps = bytes / 1024 / SAMPLE_INTERVAL.as_secs();
        speed.store(kbps, Ordering::Relaxed);
        trace!("sampled {bytes} bytes, {kbps} KB/s");
    }
}
