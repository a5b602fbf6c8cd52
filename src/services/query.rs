//! One handshake + status exchange against the monitored server.

use crate::models::snapshot::Snapshot;
use crate::protocol::codec::{
    decode_handshake_response, decode_status_response, encode_handshake_request,
    encode_status_request, strip_terminator,
};
use crate::protocol::DecodeError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65_535;

/// Why an exchange failed. Never leaves this module: callers only see `None`.
#[derive(Debug, Error)]
pub(crate) enum QueryError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no address for {0}")]
    Unresolved(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid token {0:?}")]
    InvalidToken(String),

    #[error("handshake id mismatch: sent {sent}, got {got}")]
    HandshakeIdMismatch { sent: u32, got: u32 },
}

/// Queries one remote host/port. Cheap to clone; holds no socket between calls.
#[derive(Debug, Clone)]
pub struct QueryClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl QueryClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Runs one exchange under a single deadline. `None` means unreachable,
    /// whatever the cause (timeout, refused, malformed reply).
    #[instrument(skip(self), fields(host = %self.host, port = self.port))]
    pub async fn query(&self, request_id: u32) -> Option<Snapshot> {
        match tokio::time::timeout(self.timeout, self.exchange(request_id)).await {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) => {
                debug!(error = %e, "query failed");
                None
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "query timed out");
                None
            }
        }
    }

    async fn exchange(&self, id: u32) -> Result<Snapshot, QueryError> {
        let socket = self.connect().await?;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        socket.send(&encode_handshake_request(id)).await?;
        let n = socket.recv(&mut buf).await?;
        let handshake = decode_handshake_response(&buf[..n])?;
        if handshake.id != id {
            return Err(QueryError::HandshakeIdMismatch {
                sent: id,
                got: handshake.id,
            });
        }
        let token = parse_token(&handshake.token)?;

        socket.send(&encode_status_request(id, token)).await?;
        let n = socket.recv(&mut buf).await?;
        let raw = &buf[..n];
        decode_status_response(strip_terminator(raw), id).map_err(|e| {
            debug!(raw = %hex::encode(raw), "undecodable status reply");
            QueryError::from(e)
        })
    }

    /// Ephemeral socket connected to the remote, so replies from other peers are dropped.
    async fn connect(&self) -> Result<UdpSocket, QueryError> {
        let remote = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| QueryError::Unresolved(self.host.clone()))?;
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        Ok(socket)
    }
}

/// Challenge tokens are decimal text. Some servers print them as signed
/// 32-bit values; the bit pattern is what goes back on the wire.
fn parse_token(token: &str) -> Result<u32, QueryError> {
    let token = token.trim();
    token
        .parse::<u32>()
        .or_else(|_| token.parse::<i32>().map(|t| t as u32))
        .map_err(|_| QueryError::InvalidToken(token.to_string()))
}
