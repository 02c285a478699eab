use base64ct::{Base64, Encoding};
use embedded_io_async::Write;
use sha1::{Digest, Sha1};

use crate::ascii::{CR, LF};
use crate::header::{CONNECTION, HeaderLine, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use crate::request::Request;
use crate::response::StatusCode;
use crate::{HTTPError, HttpWrite};

const SEC_WEBSOCKET_ACCEPT_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub fn sec_websocket_accept_val(key: &str) -> Result<[u8; 28], &'static str> {
    let mut key_hasher = Sha1::new();
    key_hasher.update(key.as_bytes());
    key_hasher.update(SEC_WEBSOCKET_ACCEPT_MAGIC.as_bytes());
    let key_hash = key_hasher.finalize();

    let mut key_b64_buff = [0u8; 28];
    if Base64::encode(&key_hash, &mut key_b64_buff).is_err() {
        return Err("error encoding key hash due to invalid length");
    }

    Ok(key_b64_buff)
}

/// An upgraded connection. Frames are left to whoever holds it.
pub struct Websocket<'a, C> {
    conn: &'a mut C,
}

impl<'a, C> Websocket<'a, C> {
    pub fn connection(&mut self) -> &mut C {
        self.conn
    }

    pub fn into_inner(self) -> &'a mut C {
        self.conn
    }
}

/// Answers a websocket upgrade request with `101 Switching Protocols`.
///
/// A request without a `Sec-WebSocket-Key` gets no response at all and fails
/// with [`HTTPError::NotUpgradeable`].
pub async fn upgrade<'a, C: Write>(request: Request<'a, C>) -> Result<Websocket<'a, C>, HTTPError> {
    let Some(key) = request.header(SEC_WEBSOCKET_KEY) else {
        return Err(HTTPError::NotUpgradeable);
    };
    let accept = sec_websocket_accept_val(key).map_err(HTTPError::ProtocolError)?;
    let accept = core::str::from_utf8(&accept).or(Err(HTTPError::ProtocolError(
        "websocket accept value is not ascii",
    )))?;

    let conn = request.into_connection();
    StatusCode::SwitchingProtocols.write(conn).await?;
    HeaderLine(UPGRADE, "websocket").write(conn).await?;
    HeaderLine(CONNECTION, "Upgrade").write(conn).await?;
    HeaderLine(SEC_WEBSOCKET_ACCEPT, accept).write(conn).await?;
    conn.write_all(&[CR, LF])
        .await
        .or(Err(HTTPError::Disconnected))?;
    conn.flush().await.or(Err(HTTPError::Disconnected))?;

    debug!("websocket upgraded");
    Ok(Websocket { conn })
}
