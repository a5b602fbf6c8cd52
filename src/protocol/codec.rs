//! Query protocol codec: handshake and status packets.
//!
//! Requests start with a 2-byte magic; responses start directly with the
//! packet type. All integers are big-endian. Strings are NUL-terminated and
//! carried in ISO-8859-2, so every byte maps to exactly one character.

use crate::models::snapshot::Snapshot;
use encoding_rs::ISO_8859_2;
use thiserror::Error;

/// Leading magic of every request.
pub const MAGIC: u16 = 0xFEFD;
/// Packet type: handshake (token request).
pub const TYPE_HANDSHAKE: u8 = 9;
/// Packet type: full status.
pub const TYPE_STATUS: u8 = 0;

/// Encoded handshake request size.
pub const HANDSHAKE_REQUEST_LEN: usize = 7;
/// Encoded status request size.
pub const STATUS_REQUEST_LEN: usize = 15;

/// Opaque block between the echoed id and the first key.
const STATUS_HEADER_PADDING: usize = 11;
/// Opaque block between the key/value section and the player names.
const PLAYER_SECTION_PADDING: usize = 10;
/// Trailing request bytes the remote ignores.
const STATUS_REQUEST_PADDING: usize = 4;

/// Keys of the status response, in wire order. Only their length is used when decoding.
pub const STATUS_KEYS: [&str; 10] = [
    "hostname",
    "gametype",
    "game_id",
    "version",
    "plugins",
    "map",
    "numplayers",
    "maxplayers",
    "hostport",
    "hostip",
];

// Bytes the remote puts in the fixed blocks; decoding never looks at them.
const STATUS_HEADER_FILLER: [u8; STATUS_HEADER_PADDING] = *b"splitnum\0\x80\0";
const PLAYER_SECTION_FILLER: [u8; PLAYER_SECTION_PADDING] = *b"\x01player_\0\0";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad magic: 0x{found:04x}")]
    WrongMagic { found: u16 },

    #[error("unexpected packet type {found} (expected {expected})")]
    WrongType { expected: u8, found: u8 },

    #[error("id mismatch: sent {expected}, got {found}")]
    IdMismatch { expected: u32, found: u32 },

    #[error("short read: need {needed} bytes at offset {offset}, buffer is {len}")]
    Truncated {
        needed: usize,
        offset: usize,
        len: usize,
    },

    #[error("missing NUL terminator for {field}")]
    MissingTerminator { field: &'static str },
}

type DecodeResult<T> = Result<T, DecodeError>;

/// Decoded handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub id: u32,
    /// Challenge token as sent (decimal text).
    pub token: String,
}

// ---- Encoding ----

pub fn encode_handshake_request(id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HANDSHAKE_REQUEST_LEN);
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.push(TYPE_HANDSHAKE);
    buf.extend_from_slice(&id.to_be_bytes());
    buf
}

pub fn encode_status_request(id: u32, token: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STATUS_REQUEST_LEN);
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.push(TYPE_STATUS);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&token.to_be_bytes());
    buf.extend_from_slice(&[0; STATUS_REQUEST_PADDING]);
    buf
}

/// Handshake reply as a server sends it.
pub fn encode_handshake_response(id: u32, token: &str) -> Vec<u8> {
    let mut buf = vec![TYPE_HANDSHAKE];
    buf.extend_from_slice(&id.to_be_bytes());
    write_cstring(&mut buf, token);
    buf
}

/// Full status datagram as a server sends it, including the trailing terminator.
pub fn encode_status_response(id: u32, snapshot: &Snapshot) -> Vec<u8> {
    let mut buf = vec![TYPE_STATUS];
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&STATUS_HEADER_FILLER);
    for (key, value) in STATUS_KEYS.into_iter().zip(snapshot.fields()) {
        write_cstring(&mut buf, key);
        write_cstring(&mut buf, value);
    }
    buf.push(0);
    buf.extend_from_slice(&PLAYER_SECTION_FILLER);
    for player in &snapshot.players {
        write_cstring(&mut buf, player);
    }
    buf.push(0);
    buf
}

fn write_cstring(buf: &mut Vec<u8>, s: &str) {
    let (bytes, _, _) = ISO_8859_2.encode(s);
    buf.extend_from_slice(&bytes);
    buf.push(0);
}

// ---- Decoding ----

fn read_u8(b: &[u8], off: &mut usize) -> DecodeResult<u8> {
    let v = *b.get(*off).ok_or(DecodeError::Truncated {
        needed: 1,
        offset: *off,
        len: b.len(),
    })?;
    *off += 1;
    Ok(v)
}

fn read_u16_be(b: &[u8], off: &mut usize) -> DecodeResult<u16> {
    let bytes = take(b, off, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32_be(b: &[u8], off: &mut usize) -> DecodeResult<u32> {
    let bytes = take(b, off, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take<'a>(b: &'a [u8], off: &mut usize, n: usize) -> DecodeResult<&'a [u8]> {
    if *off + n > b.len() {
        return Err(DecodeError::Truncated {
            needed: n,
            offset: *off,
            len: b.len(),
        });
    }
    let v = &b[*off..*off + n];
    *off += n;
    Ok(v)
}

fn skip(b: &[u8], off: &mut usize, n: usize) -> DecodeResult<()> {
    take(b, off, n).map(|_| ())
}

/// Reads up to the next NUL and decodes it; the NUL is consumed.
fn read_cstring(b: &[u8], off: &mut usize, field: &'static str) -> DecodeResult<String> {
    let rest = b.get(*off..).unwrap_or_default();
    let end = rest
        .iter()
        .position(|&c| c == 0)
        .ok_or(DecodeError::MissingTerminator { field })?;
    let (text, _) = ISO_8859_2.decode_without_bom_handling(&rest[..end]);
    *off += end + 1;
    Ok(text.into_owned())
}

fn expect_type(b: &[u8], off: &mut usize, expected: u8) -> DecodeResult<()> {
    let found = read_u8(b, off)?;
    if found != expected {
        return Err(DecodeError::WrongType { expected, found });
    }
    Ok(())
}

fn expect_magic(b: &[u8], off: &mut usize) -> DecodeResult<()> {
    let found = read_u16_be(b, off)?;
    if found != MAGIC {
        return Err(DecodeError::WrongMagic { found });
    }
    Ok(())
}

pub fn decode_handshake_response(buf: &[u8]) -> DecodeResult<HandshakeResponse> {
    let mut off = 0;
    expect_type(buf, &mut off, TYPE_HANDSHAKE)?;
    let id = read_u32_be(buf, &mut off)?;
    let token = read_cstring(buf, &mut off, "token")?;
    Ok(HandshakeResponse { id, token })
}

/// Decodes a status reply whose trailing terminator was already removed
/// (see [`strip_terminator`]). The echoed id must equal `expected_id`.
pub fn decode_status_response(buf: &[u8], expected_id: u32) -> DecodeResult<Snapshot> {
    let mut off = 0;
    expect_type(buf, &mut off, TYPE_STATUS)?;
    let id = read_u32_be(buf, &mut off)?;
    if id != expected_id {
        return Err(DecodeError::IdMismatch {
            expected: expected_id,
            found: id,
        });
    }
    skip(buf, &mut off, STATUS_HEADER_PADDING)?;

    let mut values: [String; 10] = Default::default();
    for (key, value) in STATUS_KEYS.into_iter().zip(values.iter_mut()) {
        skip(buf, &mut off, key.len() + 1)?;
        *value = read_cstring(buf, &mut off, key)?;
    }
    skip(buf, &mut off, 1)?;

    // A remote that omits the terminator on an empty roster leaves the
    // padding one byte short once the caller strips the last byte.
    let mut players = Vec::new();
    if buf.len() - off != PLAYER_SECTION_PADDING - 1 {
        skip(buf, &mut off, PLAYER_SECTION_PADDING)?;
        while off < buf.len() {
            players.push(read_cstring(buf, &mut off, "player")?);
        }
    }

    let [hostname, gametype, game_id, version, plugins, map, numplayers, maxplayers, hostport, hostip] =
        values;
    Ok(Snapshot {
        hostname,
        gametype,
        game_id,
        version,
        plugins,
        map,
        numplayers,
        maxplayers,
        hostport,
        hostip,
        players,
    })
}

/// Returns `(id)` of a handshake request.
pub fn decode_handshake_request(buf: &[u8]) -> DecodeResult<u32> {
    let mut off = 0;
    expect_magic(buf, &mut off)?;
    expect_type(buf, &mut off, TYPE_HANDSHAKE)?;
    read_u32_be(buf, &mut off)
}

/// Returns `(id, token)` of a status request. Padding is not checked.
pub fn decode_status_request(buf: &[u8]) -> DecodeResult<(u32, u32)> {
    let mut off = 0;
    expect_magic(buf, &mut off)?;
    expect_type(buf, &mut off, TYPE_STATUS)?;
    let id = read_u32_be(buf, &mut off)?;
    let token = read_u32_be(buf, &mut off)?;
    skip(buf, &mut off, STATUS_REQUEST_PADDING)?;
    Ok((id, token))
}

/// Drops the protocol terminator that ends every status datagram.
pub fn strip_terminator(raw: &[u8]) -> &[u8] {
    raw.split_last().map(|(_, rest)| rest).unwrap_or(raw)
}
