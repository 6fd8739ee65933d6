pub mod connector;
pub mod handshake;
pub mod messages;
pub mod seeder;
pub mod session;
pub mod signal;

pub type PeerId20 = [u8; 20];
pub type HashedId20 = [u8; 20];

pub const PROTOCOL_V_1: &[u8; 19] = b"BitTorrent protocol";
// <pstrlen><pstr><reserved><info_hash><peer_id>
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;
