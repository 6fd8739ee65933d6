use crate::{HashedId20, PeerId20, HANDSHAKE_LEN, PROTOCOL_V_1};
use bytes::{BufMut, BytesMut};
use rand::Rng;
use std::fmt::Display;

const PEER_ID_PREFIX: &[u8; 8] = b"-qB4630-";
const PEER_ID_CHARSET: &[u8; 70] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_.!~*()";

#[derive(Debug)]
pub enum InfoHashError {
    BadLength(usize),
    BadHex(hex::FromHexError),
}

impl Display for InfoHashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadLength(n) => write!(
                f,
                "info hash must be 40 hex characters, got {n} bytes"
            ),
            Self::BadHex(e) => write!(f, "info hash is not valid hex: {e}"),
        }
    }
}

impl std::error::Error for InfoHashError {}

impl From<hex::FromHexError> for InfoHashError {
    fn from(value: hex::FromHexError) -> Self {
        InfoHashError::BadHex(value)
    }
}

/// Decodes a 40 character hex string (either case) into the raw 20 byte info hash.
pub fn parse_info_hash(hex_str: &str) -> Result<HashedId20, InfoHashError> {
    if hex_str.len() != 40 {
        return Err(InfoHashError::BadLength(hex_str.len()));
    }
    let mut info_hash = HashedId20::default();
    hex::decode_to_slice(hex_str, &mut info_hash)?;
    Ok(info_hash)
}

/// Peer id in the style of qBittorrent 4.6.3: an 8 byte client tag followed by
/// 12 random characters. Not guaranteed to be unique.
pub fn generate_peer_id() -> PeerId20 {
    let mut rng = rand::rng();
    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
    for b in peer_id[8..].iter_mut() {
        *b = PEER_ID_CHARSET[rng.random_range(0..PEER_ID_CHARSET.len())];
    }
    peer_id
}

pub struct Handshake {
    pstrlen: u8,
    pstr: &'static [u8],
    reserved: u64,
    info_hash: HashedId20,
    peer_id: PeerId20,
}

impl Handshake {
    pub fn new(info_hash: HashedId20, peer_id: PeerId20) -> Self {
        Handshake {
            pstrlen: PROTOCOL_V_1.len() as u8,
            pstr: PROTOCOL_V_1,
            reserved: 0,
            info_hash,
            peer_id,
        }
    }

    pub fn info_hash(&self) -> &HashedId20 {
        &self.info_hash
    }

    pub fn peer_id(&self) -> &PeerId20 {
        &self.peer_id
    }

    // <pstrlen><pstr><reserved><info_hash><peer_id>
    pub fn serialize_handshake(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(self.pstrlen);
        buf.put_slice(self.pstr);
        buf.put_u64(self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf
    }

    /// Reads a full handshake, rejecting anything that does not speak BitTorrent v1.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HANDSHAKE_LEN {
            return None;
        }
        let pstrlen = buf[0] as usize;
        if pstrlen != PROTOCOL_V_1.len() || &buf[1..1 + pstrlen] != PROTOCOL_V_1 {
            return None;
        }
        // buf[20..28] is the reserved bits which we ignore
        let info_hash: HashedId20 = buf[28..48].try_into().ok()?;
        let peer_id: PeerId20 = buf[48..68].try_into().ok()?;
        Some(Handshake::new(info_hash, peer_id))
    }
}
