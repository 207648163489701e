//! Target resolution and dialing for OPEN frames.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::addr::{self, AddressFormat};
use crate::config::DIAL_TIMEOUT;
use crate::error::{Error, Result};
use tokio::net::TcpStream;

/// Decode an OPEN payload and dial the target, bounded by [`DIAL_TIMEOUT`].
pub async fn parse_and_dial(format: AddressFormat, payload: &[u8]) -> Result<(TcpStream, String, u16)> {
    let (host, port) = addr::parse_target(format, payload)?;
    let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| Error::DialFailed(format!("timed out connecting to {host}:{port}")))?
        .map_err(|e| Error::DialFailed(format!("{host}:{port}: {e}")))?;
    Ok((stream, host, port))
}
