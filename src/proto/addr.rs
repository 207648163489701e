//! OPEN payload (target address) encoding. Two wire forms, selected once per
//! tunnel and never mixed within it.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Which OPEN-payload encoding a tunnel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFormat {
    /// ASCII `host:port`. IPv6 literals are bracketed (`[::1]:8080`) to
    /// disambiguate from the port separator.
    Ascii,
    /// One octet atyp, then a type-specific encoding (IPv4 or length-prefixed
    /// domain name), then a big-endian port.
    Typed,
}

const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;

/// Encode `host:port` as an OPEN payload in the given format.
pub fn encode_target(format: AddressFormat, host: &str, port: u16) -> Bytes {
    match format {
        AddressFormat::Ascii => {
            let text = if host.contains(':') {
                format!("[{host}]:{port}")
            } else {
                format!("{host}:{port}")
            };
            Bytes::from(text.into_bytes())
        }
        AddressFormat::Typed => {
            if let Ok(ip) = host.parse::<std::net::Ipv4Addr>() {
                let mut buf = BytesMut::with_capacity(7);
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&ip.octets());
                buf.put_u16(port);
                buf.freeze()
            } else {
                let name = host.as_bytes();
                let mut buf = BytesMut::with_capacity(4 + name.len());
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(name.len() as u8);
                buf.put_slice(name);
                buf.put_u16(port);
                buf.freeze()
            }
        }
    }
}

/// Decode an OPEN payload in the given format back to `(host, port)`.
pub fn parse_target(format: AddressFormat, payload: &[u8]) -> Result<(String, u16)> {
    match format {
        AddressFormat::Ascii => parse_target_ascii(payload),
        AddressFormat::Typed => parse_target_typed(payload),
    }
}

fn parse_target_ascii(payload: &[u8]) -> Result<(String, u16)> {
    let text = String::from_utf8_lossy(payload);
    split_host_port(text.trim())
}

/// Split a textual `host:port` (bracketed if `host` contains a `:`) into its
/// parts. Used both to decode ASCII OPEN payloads and to parse the `target`
/// strings handed to `ClientMux::open` by upper layers.
pub fn split_host_port(text: &str) -> Result<(String, u16)> {
    if let Some(rest) = text.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::ProtocolViolation("unterminated IPv6 literal".into()))?;
        let port_str = after
            .strip_prefix(':')
            .ok_or_else(|| Error::ProtocolViolation("missing port after IPv6 literal".into()))?;
        let port = port_str
            .parse::<u16>()
            .map_err(|_| Error::ProtocolViolation(format!("invalid port {port_str:?}")))?;
        return Ok((host.to_owned(), port));
    }
    let (host, port_str) = text
        .rsplit_once(':')
        .ok_or_else(|| Error::ProtocolViolation("missing ':port'".into()))?;
    let port = port_str
        .parse::<u16>()
        .map_err(|_| Error::ProtocolViolation(format!("invalid port {port_str:?}")))?;
    Ok((host.to_owned(), port))
}

fn parse_target_typed(payload: &[u8]) -> Result<(String, u16)> {
    let mut buf = payload;
    if buf.is_empty() {
        return Err(Error::ProtocolViolation("empty OPEN payload".into()));
    }
    let atyp = buf.get_u8();
    match atyp {
        ATYP_IPV4 => {
            if buf.remaining() != 6 {
                return Err(Error::ProtocolViolation("bad IPv4 OPEN payload length".into()));
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            let port = buf.get_u16();
            Ok((std::net::Ipv4Addr::from(octets).to_string(), port))
        }
        ATYP_DOMAIN => {
            if buf.remaining() < 1 {
                return Err(Error::ProtocolViolation("truncated DOMAIN OPEN payload".into()));
            }
            let len = buf.get_u8() as usize;
            if buf.remaining() != len + 2 {
                return Err(Error::ProtocolViolation("bad DOMAIN OPEN payload length".into()));
            }
            let mut name = vec![0u8; len];
            buf.copy_to_slice(&mut name);
            let port = buf.get_u16();
            Ok((String::from_utf8_lossy(&name).into_owned(), port))
        }
        other => Err(Error::ProtocolViolation(format!("unsupported atyp {other}"))),
    }
}
