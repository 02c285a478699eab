use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_io_async::Write;

use crate::ascii::{AsciiInt, CR, LF, SP};
use crate::content_type::{TEXT_HTML, TEXT_PLAIN};
use crate::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, CONTENT_TYPE, HeaderLine, Headers, LOCATION,
};
use crate::{Close, HTTPError, HttpWrite};

const HTTP_PROTO: &str = "HTTP/1.1";

/// Size of the buffer a streamed body is sent through.
pub const CHUNK_SIZE: usize = 1024;

static CORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// When enabled, every response built afterwards carries
/// `access-control-allow-origin: *`.
pub fn set_cors_enabled(enabled: bool) {
    CORS_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn cors_enabled() -> bool {
    CORS_ENABLED.load(Ordering::Relaxed)
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusCode {
    SwitchingProtocols,
    OK,
    SeeOther,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
    ServiceUnavailable,
    Other(u16),
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::SwitchingProtocols => 101,
            Self::OK => 200,
            Self::SeeOther => 303,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
            Self::Other(n) => *n,
        }
    }

    /// Text used in the body of an error response.
    fn error_text(&self) -> &'static str {
        match self {
            Self::BadRequest => "Invalid Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
            _ => "Error",
        }
    }
}

impl HttpWrite for StatusCode {
    /// The reason phrase is always `OK`, except on a protocol switch.
    #[rustfmt::skip]
    async fn write<T: Write>(self, writer: &mut T) -> Result<(), HTTPError> {
        let code = self.code();
        if !(100..=599).contains(&code) {
            return Err(HTTPError::ProtocolError("invalid status code"));
        }
        let digits = AsciiInt::from(code as u64);
        let reason = match self {
            Self::SwitchingProtocols => "Switching Protocols",
            _ => "OK",
        };

        writer.write_all(HTTP_PROTO.as_bytes()).await
            .and(writer.write_all(&[SP]).await
            .and(writer.write_all(digits.as_bytes()).await
            .and(writer.write_all(&[SP]).await
            .and(writer.write_all(reason.as_bytes()).await
            .and(writer.write_all(&[CR, LF]).await
        ))))).or(Err(HTTPError::Disconnected))
    }
}

/// A synchronous source of body bytes, read until it returns 0.
pub trait BodySource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, HTTPError>;
}

/// Streams anything implementing `embedded_io::Read`, such as an open file.
pub struct Reader<R>(pub R);

impl<R: embedded_io::Read> BodySource for Reader<R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, HTTPError> {
        self.0
            .read(buf)
            .or(Err(HTTPError::NetworkError("body source read failed")))
    }
}

/// Streams the pieces produced by an iterator, typically generated markup.
pub struct Chunks<I: Iterator> {
    iter: I,
    pending: Option<I::Item>,
    offset: usize,
}

impl<I: Iterator> Chunks<I> {
    pub fn new(iter: I) -> Self {
        Self {
            iter,
            pending: None,
            offset: 0,
        }
    }
}

impl<I> BodySource for Chunks<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, HTTPError> {
        loop {
            if let Some(piece) = &self.pending {
                let rest = &piece.as_ref()[self.offset..];
                if !rest.is_empty() {
                    let n = rest.len().min(buf.len());
                    buf[..n].copy_from_slice(&rest[..n]);
                    self.offset += n;
                    return Ok(n);
                }
            }

            match self.iter.next() {
                Some(piece) => {
                    self.pending = Some(piece);
                    self.offset = 0;
                }
                None => {
                    self.pending = None;
                    return Ok(0);
                }
            }
        }
    }
}

pub enum Body {
    Empty,
    Text(String),
    Stream(Box<dyn BodySource>),
}

impl Body {
    pub fn stream(source: impl BodySource + 'static) -> Self {
        Self::Stream(Box::new(source))
    }
}

impl Debug for Body {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(String::from(value))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Body,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK, Body::Empty)
    }
}

impl Response {
    /// A response with the default headers, plus the CORS header when enabled.
    pub fn new(status: StatusCode, body: impl Into<Body>) -> Self {
        let mut headers: Headers = [(CONTENT_TYPE, TEXT_HTML), (CONNECTION, "close")]
            .into_iter()
            .collect();
        if cors_enabled() {
            headers.set(ACCESS_CONTROL_ALLOW_ORIGIN, "*");
        }

        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// An empty location redirects to `/`.
    pub fn see_other(location: &str) -> Self {
        let location = if location.is_empty() { "/" } else { location };
        Self::new(StatusCode::SeeOther, Body::Empty).with_header(LOCATION, location)
    }

    /// A plain-text `"<code> <text>"` body, followed by `" - <details>"` if given.
    pub fn error(status: StatusCode, details: Option<&str>) -> Self {
        let body = match details {
            Some(details) => format!("{} {} - {}", status.code(), status.error_text(), details),
            None => format!("{} {}", status.code(), status.error_text()),
        };
        Self::new(status, body).with_header(CONTENT_TYPE, TEXT_PLAIN)
    }

    pub fn bad_request(details: Option<&str>) -> Self {
        Self::error(StatusCode::BadRequest, details)
    }

    pub fn not_found() -> Self {
        Self::error(StatusCode::NotFound, None)
    }

    pub fn method_not_allowed() -> Self {
        Self::error(StatusCode::MethodNotAllowed, None)
    }

    pub fn server_error(details: Option<&str>) -> Self {
        Self::error(StatusCode::InternalServerError, details)
    }

    pub fn service_unavailable() -> Self {
        Self::error(StatusCode::ServiceUnavailable, None)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_headers(mut self, headers: &Headers) -> Self {
        self.headers.merge(headers);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }
}

/// Writes `response` to `conn`. With `close` unset the connection stays open
/// for the handler to keep writing, as server-sent events do.
pub async fn send<C: Write + Close>(
    conn: &mut C,
    response: Response,
    close: bool,
) -> Result<(), HTTPError> {
    let result = write_response(conn, response).await;
    if close {
        conn.close();
    }
    result
}

async fn write_response<C: Write>(conn: &mut C, response: Response) -> Result<(), HTTPError> {
    trace!("sending response: {}", response.status.code());

    response.status.write(conn).await?;
    for (name, value) in response.headers.iter() {
        HeaderLine(name, value).write(conn).await?;
    }
    conn.write_all(&[CR, LF])
        .await
        .or(Err(HTTPError::Disconnected))?;

    match response.body {
        Body::Empty => {}
        Body::Text(text) => conn
            .write_all(text.as_bytes())
            .await
            .or(Err(HTTPError::Disconnected))?,
        Body::Stream(mut source) => {
            let mut chunk = [0u8; CHUNK_SIZE];
            loop {
                let n = source.read_chunk(&mut chunk)?;
                if n == 0 {
                    break;
                }
                conn.write_all(&chunk[..n])
                    .await
                    .or(Err(HTTPError::Disconnected))?;
            }
        }
    }

    conn.flush().await.or(Err(HTTPError::Disconnected))
}
