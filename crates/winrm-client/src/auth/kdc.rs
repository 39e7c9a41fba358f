//! Minimal KDC network client used to resolve suspended `sspi` generator
//! rounds during Kerberos authentication.
//!
//! Runs on a blocking worker thread; the Kerberos wire exchange over TCP
//! carries a 4-byte big-endian length prefix on responses (RFC 4120 §7.2.2).

use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::time::Duration;

use sspi::generator::NetworkRequest;
use sspi::network_client::NetworkProtocol;
use tracing::debug;

use crate::error::WinRmError;

const KDC_PORT: u16 = 88;
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE: u32 = 4 * 1024 * 1024;

pub fn exchange(request: &NetworkRequest) -> Result<Vec<u8>, WinRmError> {
    let address = socket_address(request)?;
    debug!(%address, protocol = ?request.protocol, "KDC exchange");

    match request.protocol {
        NetworkProtocol::Tcp => exchange_tcp(&address, &request.data),
        NetworkProtocol::Udp => exchange_udp(&address, &request.data),
        NetworkProtocol::Http | NetworkProtocol::Https => Err(WinRmError::Auth(
            "KDC proxy (MS-KKDCP) endpoints are not supported".to_string(),
        )),
    }
}

fn socket_address(request: &NetworkRequest) -> Result<String, WinRmError> {
    let host = request
        .url
        .host_str()
        .ok_or_else(|| WinRmError::Auth("KDC URL has no host".to_string()))?;
    let port = request.url.port().unwrap_or(KDC_PORT);
    Ok(format!("{host}:{port}"))
}

fn exchange_tcp(address: &str, data: &[u8]) -> Result<Vec<u8>, WinRmError> {
    let mut stream = TcpStream::connect(address)
        .map_err(|err| WinRmError::Auth(format!("KDC connect to {address} failed: {err}")))?;
    stream.set_read_timeout(Some(EXCHANGE_TIMEOUT))?;
    stream.set_write_timeout(Some(EXCHANGE_TIMEOUT))?;

    // The generator's payload already carries the request length prefix.
    stream.write_all(data)?;

    let mut length_prefix = [0u8; 4];
    stream.read_exact(&mut length_prefix)?;
    let length = u32::from_be_bytes(length_prefix);
    if length > MAX_RESPONSE {
        return Err(WinRmError::Auth(format!(
            "KDC response of {length} bytes exceeds limit"
        )));
    }

    // The caller expects the framing prefix back on the response.
    let mut response = vec![0u8; length as usize + 4];
    response[..4].copy_from_slice(&length_prefix);
    stream.read_exact(&mut response[4..])?;
    Ok(response)
}

fn exchange_udp(address: &str, data: &[u8]) -> Result<Vec<u8>, WinRmError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(EXCHANGE_TIMEOUT))?;
    socket
        .send_to(data, address)
        .map_err(|err| WinRmError::Auth(format!("KDC send to {address} failed: {err}")))?;

    let mut buffer = vec![0u8; 64 * 1024];
    let received = socket.recv(&mut buffer)?;
    buffer.truncate(received);
    Ok(buffer)
}
