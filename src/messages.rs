use byteorder::{ByteOrder, NetworkEndian};
use std::io::{self, Result};

/// Size of the block we ask for, 2^14 or 16KB.
pub const BLOCK_LEN: u32 = 1 << 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    // <len=0013><id=6><index><begin><length>
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

#[derive(Debug)]
pub struct Piece<'a> {
    // <len=0009+X><id=7><index><begin><block>
    pub index: u32,
    pub begin: u32,
    pub block: &'a [u8],
}

#[derive(Debug)]
pub enum Message<'a> {
    KeepAlive,        // <len=0000>
    Interested,       // <len=0001><id=2>
    NotInterested,    // <len=0001><id=3>
    Request(Request), // <len=0013><id=6><index><begin><length>
    Piece(Piece<'a>), // <len=0009+X><id=7><index><begin><block>
    Unknown(u8),
}

impl<'a> Message<'a> {
    // <length prefix><message ID><payload>
    // 1. length prefix is a four byte big-endian value
    // 2. message ID is a single decimal byte
    // 3. payload is message dependent

    /// Number of bytes `create` writes, length prefix included.
    pub fn encoded_len(&self) -> usize {
        4 + match self {
            Message::KeepAlive => 0,
            Message::Interested | Message::NotInterested => 1,
            Message::Request(_) => 13,
            Message::Piece(p) => 9 + p.block.len(),
            Message::Unknown(_) => 1,
        }
    }

    /// Writes the message into the front of `buf` and returns how many bytes were used.
    pub fn create(&self, buf: &mut [u8]) -> Result<usize> {
        let total = self.encoded_len();
        if buf.len() < total {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer holds {} bytes, message needs {}", buf.len(), total),
            ));
        }

        NetworkEndian::write_u32(buf, (total - 4) as u32);
        match self {
            Message::KeepAlive => {}
            Message::Interested => buf[4] = 2,
            Message::NotInterested => buf[4] = 3,
            Message::Request(s) => {
                buf[4] = 6;
                NetworkEndian::write_u32(&mut buf[5..9], s.index);
                NetworkEndian::write_u32(&mut buf[9..13], s.begin);
                NetworkEndian::write_u32(&mut buf[13..17], s.length);
            }
            Message::Piece(s) => {
                buf[4] = 7;
                NetworkEndian::write_u32(&mut buf[5..9], s.index);
                NetworkEndian::write_u32(&mut buf[9..13], s.begin);
                buf[13..total].copy_from_slice(s.block);
            }
            Message::Unknown(id) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("refusing to encode unknown message id {id}"),
                ));
            }
        }

        Ok(total)
    }

    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Message too short",
            ));
        }
        let size = NetworkEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() != 4 + size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Message length different than expected. expected {}, got {}",
                    4 + size,
                    buf.len()
                ),
            ));
        }

        if size == 0 {
            return Ok(Message::KeepAlive);
        }

        let msg = match buf[4] {
            2 if size == 1 => Message::Interested,
            3 if size == 1 => Message::NotInterested,
            6 if size == 13 => Message::Request(Request {
                index: NetworkEndian::read_u32(&buf[5..9]),
                begin: NetworkEndian::read_u32(&buf[9..13]),
                length: NetworkEndian::read_u32(&buf[13..17]),
            }),
            7 if size >= 9 => Message::Piece(Piece {
                index: NetworkEndian::read_u32(&buf[5..9]),
                begin: NetworkEndian::read_u32(&buf[9..13]),
                block: &buf[13..],
            }),
            2 | 3 | 6 | 7 => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("message id {} with bad length {}", buf[4], size),
                ))
            }
            id => Message::Unknown(id),
        };

        Ok(msg)
    }
}
