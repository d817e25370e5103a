//! WebSocket opening handshake, client side
//!
//! Plain HTTP/1.1 over the raw stream: one GET with the upgrade headers,
//! one 101 response back. The response is read without consuming anything
//! past the `\r\n\r\n` terminator; bytes after it belong to the first
//! WebSocket frame and stay in the socket for the frame decoder.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::endpoint::WsEndpoint;
use crate::error::TransportError;

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the upgrade response; DevTools sends a few hundred bytes
const MAX_RESPONSE_BYTES: usize = 16 * 1024;

/// Fresh `Sec-WebSocket-Key`: base64 of 16 random bytes
pub fn generate_key() -> String {
    let raw: [u8; 16] = rand::random();
    BASE64.encode(raw)
}

/// The `Sec-WebSocket-Accept` value the server must echo for `key`
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID);
    BASE64.encode(sha1.finalize())
}

/// Build the upgrade request for `endpoint`
pub fn build_upgrade_request(endpoint: &WsEndpoint, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {authority}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        path = endpoint.path,
        authority = endpoint.authority(),
        key = key,
    )
}

/// Perform the upgrade on an established stream
pub async fn upgrade<S>(stream: &mut S, endpoint: &WsEndpoint) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let request = build_upgrade_request(endpoint, &key);

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| TransportError::HandshakeFailed(format!("write failed: {}", e)))?;

    // One byte at a time: slow, but the handshake happens once per
    // connection and this cannot over-read into frame data.
    let mut response = Vec::with_capacity(1024);
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| TransportError::HandshakeFailed(format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(TransportError::HandshakeFailed(
                "connection closed during upgrade".to_string(),
            ));
        }

        response.push(byte[0]);
        if response.ends_with(b"\r\n\r\n") {
            break;
        }
        if response.len() > MAX_RESPONSE_BYTES {
            return Err(TransportError::HandshakeFailed(
                "oversized upgrade response".to_string(),
            ));
        }
    }

    validate_upgrade_response(&response, &key)?;
    debug!("WebSocket upgrade complete for {}", endpoint.url());
    Ok(())
}

/// Require status 101 and a matching `Sec-WebSocket-Accept`
pub fn validate_upgrade_response(raw: &[u8], key: &str) -> Result<(), TransportError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    response
        .parse(raw)
        .map_err(|e| TransportError::HandshakeFailed(format!("unparseable response: {}", e)))?;

    match response.code {
        Some(101) => {}
        code => {
            return Err(TransportError::HandshakeFailed(format!(
                "expected 101 Switching Protocols, got {:?}",
                code
            )));
        }
    }

    let expected = accept_key(key);
    let accept = response
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("sec-websocket-accept"));

    match accept {
        Some(h) if h.value == expected.as_bytes() => Ok(()),
        Some(_) => Err(TransportError::HandshakeFailed(
            "Sec-WebSocket-Accept mismatch".to_string(),
        )),
        None => Err(TransportError::HandshakeFailed(
            "missing Sec-WebSocket-Accept header".to_string(),
        )),
    }
}
