//! Minecraft Server List Ping over TCP.
//!
//! One exchange per call: handshake (next state = status), status request,
//! then a single length-prefixed JSON response.

use std::io;
use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use shared::types::ProbeOutcome;

/// Protocol version sent in the handshake; servers answer status pings for any value
const HANDSHAKE_PROTOCOL_VERSION: i32 = -1;
const NEXT_STATE_STATUS: i32 = 1;
const PACKET_ID_HANDSHAKE: i32 = 0x00;
const PACKET_ID_STATUS: i32 = 0x00;
const MAX_PACKET_LEN: usize = 1 << 20;

/// Why a server was unreachable. Logged, never recorded.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid target {host}:{port}")]
    InvalidTarget { host: String, port: u16 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol mismatch: {0}")]
    Protocol(String),

    #[error("malformed status json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Status payload as sent by the server
#[derive(Debug, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub version: Option<PingVersion>,
    #[serde(default)]
    pub players: Option<PingPlayers>,
    #[serde(default)]
    pub description: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PingVersion {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PingPlayers {
    #[serde(default)]
    pub online: u32,
    #[serde(default)]
    pub max: u32,
}

impl PingResponse {
    /// Message of the day, flattened from either a plain string or a chat component
    pub fn motd(&self) -> Option<String> {
        let mut text = String::new();
        flatten_chat(self.description.as_ref()?, &mut text);
        (!text.is_empty()).then_some(text)
    }

    pub fn into_outcome(self) -> ProbeOutcome {
        let motd = self.motd();
        let (player_count, max_players) = self
            .players
            .map(|p| (p.online, p.max.max(p.online)))
            .unwrap_or((0, 0));

        ProbeOutcome::Online {
            player_count,
            max_players,
            motd,
            version: self.version.map(|v| v.name).filter(|name| !name.is_empty()),
        }
    }
}

fn flatten_chat(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(s)) = map.get("text") {
                out.push_str(s);
            }
            if let Some(serde_json::Value::Array(extra)) = map.get("extra") {
                for part in extra {
                    flatten_chat(part, out);
                }
            }
        }
        serde_json::Value::Array(parts) => {
            for part in parts {
                flatten_chat(part, out);
            }
        }
        _ => {}
    }
}

/// Ping a server once, bounded by `timeout` end to end (DNS, connect, exchange)
pub async fn ping(host: &str, port: u16, timeout: Duration) -> Result<PingResponse, ProbeError> {
    if host.trim().is_empty() || port == 0 {
        return Err(ProbeError::InvalidTarget { host: host.to_string(), port });
    }

    tokio::time::timeout(timeout, exchange(host, port))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

async fn exchange(host: &str, port: u16) -> Result<PingResponse, ProbeError> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(ProbeError::Connect)?;

    let mut handshake = Vec::with_capacity(host.len() + 16);
    write_varint(&mut handshake, HANDSHAKE_PROTOCOL_VERSION);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, NEXT_STATE_STATUS);

    let mut out = encode_packet(PACKET_ID_HANDSHAKE, &handshake);
    out.extend(encode_packet(PACKET_ID_STATUS, &[]));
    stream.write_all(&out).await?;
    stream.flush().await?;

    let body = read_packet(&mut stream).await?;
    let mut cursor = body.as_slice();

    let packet_id = read_varint_slice(&mut cursor)?;
    if packet_id != PACKET_ID_STATUS {
        return Err(ProbeError::Protocol(format!("unexpected packet id {packet_id:#04x}")));
    }

    let json_len = usize::try_from(read_varint_slice(&mut cursor)?)
        .map_err(|_| ProbeError::Protocol("negative string length".to_string()))?;
    if json_len > cursor.len() {
        return Err(ProbeError::Protocol("truncated status string".to_string()));
    }

    Ok(serde_json::from_slice(&cursor[..json_len])?)
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

pub(crate) fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

pub(crate) fn encode_packet(id: i32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut body, id);
    body.extend_from_slice(payload);

    let mut packet = Vec::with_capacity(body.len() + 5);
    write_varint(&mut packet, body.len() as i32);
    packet.extend(body);
    packet
}

/// Read one length-prefixed packet body (packet id included)
pub(crate) async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProbeError> {
    let len = read_varint(reader).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| (1..=MAX_PACKET_LEN).contains(len))
        .ok_or_else(|| ProbeError::Protocol(format!("bad packet length {len}")))?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProbeError> {
    let mut result: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ProbeError::Protocol("varint too long".to_string()))
}

pub(crate) fn read_varint_slice(cursor: &mut &[u8]) -> Result<i32, ProbeError> {
    let mut result: u32 = 0;
    for i in 0..5 {
        let (&byte, rest) = cursor
            .split_first()
            .ok_or_else(|| ProbeError::Protocol("truncated varint".to_string()))?;
        *cursor = rest;
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ProbeError::Protocol("varint too long".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_encoding() {
        let cases: [(i32, &[u8]); 5] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (25565, &[0xDD, 0xC7, 0x01]),
            (-1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];
        for (value, expected) in cases {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf, expected, "encoding {value}");

            let mut cursor = buf.as_slice();
            assert_eq!(read_varint_slice(&mut cursor).unwrap(), value);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_motd_from_chat_component() {
        let response: PingResponse = serde_json::from_str(
            r#"{
                "version": {"name": "Paper 1.20.4", "protocol": 765},
                "players": {"online": 2, "max": 20},
                "description": {"text": "Welcome ", "extra": [{"text": "home"}, "!"]}
            }"#,
        )
        .unwrap();
        assert_eq!(response.motd().as_deref(), Some("Welcome home!"));
    }

    #[test]
    fn test_outcome_never_reports_more_players_than_max() {
        let response: PingResponse = serde_json::from_str(
            r#"{"players": {"online": 25, "max": 20}, "description": "busy"}"#,
        )
        .unwrap();

        match response.into_outcome() {
            ProbeOutcome::Online { player_count, max_players, motd, version } => {
                assert_eq!(player_count, 25);
                assert_eq!(max_players, 25);
                assert_eq!(motd.as_deref(), Some("busy"));
                assert!(version.is_none());
            }
            ProbeOutcome::Offline => panic!("expected online outcome"),
        }
    }

    #[tokio::test]
    async fn test_invalid_target_rejected_without_network() {
        let result = ping("", 25565, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::InvalidTarget { .. })));
    }
}
