//! A loopback peer for trying the load generator without a real client.
//!
//! It answers any BitTorrent v1 handshake and replies to every `request` with a
//! zero-filled `piece` of the asked length. Nothing is verified or stored.

use crate::{
    handshake::{generate_peer_id, Handshake},
    messages::{Message, Piece},
    signal::StopSignal,
    HANDSHAKE_LEN,
};
use byteorder::{ByteOrder, NetworkEndian};
use log::{debug, error, info, warn};
use std::{io, net::SocketAddr};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Largest block we are willing to hand out, anything bigger is clamped.
pub const MAX_BLOCK_LEN: usize = 128 * 1024;

// request is the largest message we expect from the client side
const MAX_INCOMING_LEN: usize = 1024;

/// Accepts peers until `signal` fires, one task per connection.
pub async fn serve(listener: TcpListener, signal: StopSignal) -> io::Result<()> {
    info!("Seeder listening on {}", listener.local_addr()?);
    loop {
        let (stream, addr) = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        info!("{addr} attempting to connect");
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = signal.cancelled() => debug!("Seeder shutting down, dropping {addr}"),
                res = handle_peer(stream, addr) => match res {
                    Ok(()) => debug!("Stream closed, {addr}"),
                    Err(e) => warn!("Peer {addr} dropped: {e}"),
                },
            }
        });
    }
    info!("Seeder stopped");
    Ok(())
}

async fn handle_peer(mut stream: TcpStream, addr: SocketAddr) -> io::Result<()> {
    let mut their_handshake = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut their_handshake).await?;
    let Some(handshake) = Handshake::parse(&their_handshake) else {
        error!("Peer {addr} does not speak BitTorrent v1");
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad protocol string",
        ));
    };
    debug!("Confirmed protocol from {addr}");

    let reply = Handshake::new(*handshake.info_hash(), generate_peer_id()).serialize_handshake();
    stream.write_all(&reply).await?;
    debug!("Sent handshake to {addr}");

    let mut len_buf = [0u8; 4];
    let mut msg_buf = vec![0u8; MAX_INCOMING_LEN];
    let zeroes = vec![0u8; MAX_BLOCK_LEN];
    let mut out_buf = vec![0u8; MAX_BLOCK_LEN + 13];

    loop {
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let msg_len = NetworkEndian::read_u32(&len_buf) as usize + 4;
        if msg_len > MAX_INCOMING_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message of {msg_len} bytes is too big"),
            ));
        }
        msg_buf[..4].copy_from_slice(&len_buf);
        stream.read_exact(&mut msg_buf[4..msg_len]).await?;

        let msg = match Message::parse(&msg_buf[..msg_len]) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Unparseable message from {addr}: {e}");
                continue;
            }
        };
        match msg {
            Message::KeepAlive => {}
            Message::Interested => debug!("{addr} is interested"),
            Message::NotInterested => debug!("{addr} is not interested"),
            Message::Request(r) => {
                let length = (r.length as usize).min(MAX_BLOCK_LEN);
                let len = Message::Piece(Piece {
                    index: r.index,
                    begin: r.begin,
                    block: &zeroes[..length],
                })
                .create(&mut out_buf)?;
                stream.write_all(&out_buf[..len]).await?;
            }
            Message::Piece(_) | Message::Unknown(_) => {
                debug!("Ignoring message from {addr}");
            }
        }
    }
}
