//! Minimal SOCKS5 ingress adapter (CONNECT only). Feeds the client
//! multiplexor through the same public `open` API any upper layer would
//! use; BIND and UDP ASSOCIATE are out of scope.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use muxtun_proto::client::ClientMux;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const SOCKS_VERSION: u8 = 5;
const CMD_CONNECT: u8 = 1;
const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;
const ATYP_IPV6: u8 = 4;

/// Errors from the SOCKS5 handshake or the resulting stream.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unsupported SOCKS version {0}")]
    UnsupportedVersion(u8),
    #[error("client does not offer NOAUTH")]
    OtherAuth,
    #[error("only CONNECT is supported, got command {0}")]
    UnsupportedCommand(u8),
    #[error("unsupported address type {0}")]
    AddressType(u8),
    #[error(transparent)]
    Mux(#[from] muxtun_proto::Error),
}

/// Handle one inbound SOCKS5 connection end to end: handshake, CONNECT
/// request, open a multiplexed stream, then pipe bytes until either side
/// closes.
pub async fn handle_connection(mut stream: TcpStream, mux: &ClientMux) -> Result<(), Error> {
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&0x00) {
        stream.write_all(&[SOCKS_VERSION, 0xff]).await?;
        return Err(Error::OtherAuth);
    }
    stream.write_all(&[SOCKS_VERSION, 0x00]).await?;

    let mut hdr = [0u8; 4];
    stream.read_exact(&mut hdr).await?;
    let [_ver, cmd, _rsv, atyp] = hdr;
    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut name = vec![0u8; len as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        other => {
            write_reply(&mut stream, 0x08).await?;
            return Err(Error::AddressType(other));
        }
    };
    let port = stream.read_u16().await?;

    if cmd != CMD_CONNECT {
        write_reply(&mut stream, 0x07).await?;
        return Err(Error::UnsupportedCommand(cmd));
    }

    let target = format!("{host}:{port}");
    debug!("SOCKS5 CONNECT -> {target}");
    let mut mux_stream = match mux.open(7, &target) {
        Ok(s) => s,
        Err(e) => {
            write_reply(&mut stream, 0x01).await?;
            return Err(Error::Mux(e));
        }
    };
    write_reply(&mut stream, 0x00).await?;
    tokio::io::copy_bidirectional(&mut stream, &mut mux_stream).await?;
    Ok(())
}

async fn write_reply(stream: &mut TcpStream, rep: u8) -> std::io::Result<()> {
    let mut resp = vec![SOCKS_VERSION, rep, 0x00, ATYP_IPV4];
    resp.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());
    resp.extend_from_slice(&0u16.to_be_bytes());
    stream.write_all(&resp).await
}
