use alloc::string::String;
use alloc::vec::Vec;
use core::mem;
use embedded_io_async::{Error, ErrorKind, Read, Write};

use crate::HTTPError;
use crate::ascii::{COLON, atoi, find_crlf, latin1};
use crate::header::{CONTENT_LENGTH, Headers};
use crate::query::Query;

const GET: &[u8] = "GET".as_bytes();
const POST: &[u8] = "POST".as_bytes();
const PUT: &[u8] = "PUT".as_bytes();
const PATCH: &[u8] = "PATCH".as_bytes();
const DELETE: &[u8] = "DELETE".as_bytes();
const OPTIONS: &[u8] = "OPTIONS".as_bytes();
const HEAD: &[u8] = "HEAD".as_bytes();

const CONTINUE: &[u8] = "HTTP/1.1 100 Continue\r\n\r\n".as_bytes();

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    OPTIONS,
    HEAD,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::PATCH => "PATCH",
            Self::DELETE => "DELETE",
            Self::OPTIONS => "OPTIONS",
            Self::HEAD => "HEAD",
        }
    }
}

impl TryFrom<&[u8]> for Method {
    type Error = &'static str;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            GET => Ok(Self::GET),
            POST => Ok(Self::POST),
            PUT => Ok(Self::PUT),
            PATCH => Ok(Self::PATCH),
            DELETE => Ok(Self::DELETE),
            OPTIONS => Ok(Self::OPTIONS),
            HEAD => Ok(Self::HEAD),
            _ => Err("unknown http method"),
        }
    }
}

/// Everything before the body.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestHead {
    pub method: Method,
    /// Not percent-decoded.
    pub path: String,
    pub version: String,
    pub query: Query,
    pub headers: Headers,
}

impl RequestHead {
    /// Parses the request line and headers at the start of `data`, returning
    /// the head and the offset of the first body byte.
    ///
    /// Fails with `ShortRead` while the blank line ending the headers has not
    /// arrived yet.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), HTTPError> {
        let end = find_crlf(data, 0).ok_or(HTTPError::ShortRead)?;
        let (method, path, version, query) = Self::parse_request_line(&data[..end])?;

        let mut headers = Headers::new();
        let mut line_start = end + 2;
        loop {
            let end = find_crlf(data, line_start).ok_or(HTTPError::ShortRead)?;
            if end == line_start {
                line_start += 2;
                break;
            }
            let (name, value) = Self::parse_header_line(&data[line_start..end])?;
            headers.set(&name, &value);
            line_start = end + 2;
        }

        if let Some(length) = headers.get(CONTENT_LENGTH)
            && atoi(length.as_bytes()).is_none()
        {
            return Err(HTTPError::ProtocolError("invalid content-length"));
        }

        let head = RequestHead {
            method,
            path,
            version,
            query,
            headers,
        };

        Ok((head, line_start))
    }

    fn parse_request_line(line: &[u8]) -> Result<(Method, String, String, Query), HTTPError> {
        let mut words = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|w| !w.is_empty());
        let (Some(method), Some(uri), Some(version), None) =
            (words.next(), words.next(), words.next(), words.next())
        else {
            return Err(HTTPError::ProtocolError("malformed request line"));
        };

        let method = Method::try_from(method).map_err(HTTPError::ProtocolError)?;
        let (path, query) = match uri.iter().position(|b| *b == b'?') {
            Some(q) => (latin1(&uri[..q]), Query::parse(&latin1(&uri[q + 1..]))),
            None => (latin1(uri), Query::default()),
        };

        Ok((method, path, latin1(version), query))
    }

    fn parse_header_line(line: &[u8]) -> Result<(String, String), HTTPError> {
        let colon = line
            .iter()
            .position(|b| *b == COLON)
            .ok_or(HTTPError::ProtocolError("malformed header line"))?;

        let name = latin1(&line[..colon]);
        let value = latin1(&line[colon + 1..]);

        Ok((String::from(name.trim()), String::from(value.trim())))
    }
}

/// A parsed request, still attached to the connection it arrived on.
///
/// The body is whatever followed the headers in the read buffer, continued
/// from the connection up to `content-length`.
pub struct Request<'r, C> {
    pub method: Method,
    pub path: String,
    pub version: String,
    pub query: Query,
    pub headers: Headers,
    in_hand: &'r [u8],
    consumed: usize,
    conn: &'r mut C,
}

impl<'r, C> Request<'r, C> {
    pub fn new(head: RequestHead, in_hand: &'r [u8], conn: &'r mut C) -> Self {
        let content_length = head
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|l| atoi(l.as_bytes()));
        let in_hand = match content_length {
            Some(l) if l < in_hand.len() => &in_hand[..l],
            _ => in_hand,
        };

        Self {
            method: head.method,
            path: head.path,
            version: head.version,
            query: head.query,
            headers: head.headers,
            in_hand,
            consumed: 0,
            conn,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|l| atoi(l.as_bytes()))
    }

    /// Body bytes that arrived together with the headers.
    pub fn body_in_hand(&self) -> &[u8] {
        self.in_hand
    }

    pub fn connection(&mut self) -> &mut C {
        self.conn
    }

    pub fn into_connection(self) -> &'r mut C {
        self.conn
    }

    /// Moves the parsed request into a new one that borrows the connection
    /// for a shorter time, so the connection can still be used once the new
    /// request is dropped.
    pub(crate) fn reborrow(&mut self) -> Request<'_, C> {
        Request {
            method: self.method,
            path: mem::take(&mut self.path),
            version: mem::take(&mut self.version),
            query: mem::take(&mut self.query),
            headers: mem::take(&mut self.headers),
            in_hand: self.in_hand,
            consumed: self.consumed,
            conn: &mut *self.conn,
        }
    }

    fn body_remaining(&self) -> usize {
        self.content_length()
            .unwrap_or(self.in_hand.len())
            .saturating_sub(self.consumed)
    }
}

impl<'r, C: Read> Request<'r, C> {
    /// Reads the next part of the body into `buf`, first from the bytes in
    /// hand, then from the connection. Returns 0 once the body is complete.
    pub async fn read_body(&mut self, buf: &mut [u8]) -> Result<usize, HTTPError> {
        let remaining = self.body_remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let limit = remaining.min(buf.len());
        if self.consumed < self.in_hand.len() {
            let n = limit.min(self.in_hand.len() - self.consumed);
            buf[..n].copy_from_slice(&self.in_hand[self.consumed..self.consumed + n]);
            self.consumed += n;
            return Ok(n);
        }

        match self.conn.read(&mut buf[..limit]).await {
            Ok(0) => Err(HTTPError::Disconnected),
            Ok(n) => {
                self.consumed += n;
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Err(HTTPError::Disconnected),
            Err(_) => Err(HTTPError::NetworkError("unexpected network error")),
        }
    }

    pub async fn read_body_to_end(&mut self) -> Result<Vec<u8>, HTTPError> {
        let mut body = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = self.read_body(&mut chunk).await?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }
}

impl<'r, C: Write> Request<'r, C> {
    /// Tells a client waiting on `Expect: 100-continue` to send the body.
    pub async fn send_continue(&mut self) -> Result<(), HTTPError> {
        self.conn
            .write_all(CONTINUE)
            .await
            .or(Err(HTTPError::Disconnected))?;
        self.conn.flush().await.or(Err(HTTPError::Disconnected))
    }
}

/// Reads from `conn` until a complete request head is in `buf`.
pub async fn read_request<'r, C: Read>(
    conn: &'r mut C,
    buf: &'r mut [u8],
) -> Result<Request<'r, C>, HTTPError> {
    let mut filled = 0;

    let (head, header_len) = loop {
        if filled == buf.len() {
            return Err(HTTPError::ShortRead);
        }

        match conn.read(&mut buf[filled..]).await {
            Ok(0) if filled == 0 => return Err(HTTPError::ZeroRead),
            Ok(0) => return Err(HTTPError::ShortRead),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                if filled == 0 {
                    return Err(HTTPError::ZeroRead);
                }
                return Err(HTTPError::Disconnected);
            }
            Err(_) => return Err(HTTPError::NetworkError("unexpected network error")),
        }

        match RequestHead::parse(&buf[..filled]) {
            Ok(parsed) => break parsed,
            Err(HTTPError::ShortRead) => continue,
            Err(e) => return Err(e),
        }
    };

    let buf: &'r [u8] = buf;
    Ok(Request::new(head, &buf[header_len..filled], conn))
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::string::ToString;

    use super::*;
    use crate::testing::TestConnection;

    #[test]
    fn test_parse_request_head() {
        let data = "GET /items?limit=10&flag&bad=a=b HTTP/1.1\r\nHost: device\r\nX-Thing:  spaced  \r\n\r\nbody"
            .as_bytes();

        let (head, len) = RequestHead::parse(data).unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.path, "/items");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.query.get("limit"), Some("10"));
        assert!(head.query.contains_key("flag"));
        assert!(!head.query.contains_key("bad"));
        assert_eq!(head.headers.get("host"), Some("device"));
        assert_eq!(head.headers.get("x-thing"), Some("spaced"));
        assert_eq!(&data[len..], "body".as_bytes());
    }

    #[test]
    fn test_parse_duplicate_headers_overwrite() {
        let data = "POST / HTTP/1.0\r\nX-A: 1\r\nx-a: 2\r\n\r\n".as_bytes();
        let (head, _) = RequestHead::parse(data).unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.headers.get_all("x-a").count(), 1);
        assert_eq!(head.headers.get("X-A"), Some("2"));
    }

    #[test]
    fn test_parse_latin1_header() {
        let data = [
            "GET / HTTP/1.1\r\nx-name: caf".as_bytes(),
            &[0xE9u8][..],
            "\r\n\r\n".as_bytes(),
        ]
        .concat();
        let (head, _) = RequestHead::parse(&data).unwrap();
        assert_eq!(head.headers.get("x-name"), Some("caf\u{e9}"));
    }

    #[test]
    fn test_parse_request_line_extra_spaces() {
        let data = "GET  /items?limit=2   HTTP/1.1 \r\n\r\n".as_bytes();
        let (head, _) = RequestHead::parse(data).unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.path, "/items");
        assert_eq!(head.query.get("limit"), Some("2"));
        assert_eq!(head.version, "HTTP/1.1");
    }

    #[test]
    fn test_parse_errors() {
        for (data, expected) in [
            ("GET / HTTP/1.1", HTTPError::ShortRead),
            ("GET / HTTP/1.1\r\nhost: a\r\n", HTTPError::ShortRead),
            (
                "GET /\r\n\r\n",
                HTTPError::ProtocolError("malformed request line"),
            ),
            (
                "GET / HTTP/1.1 extra\r\n\r\n",
                HTTPError::ProtocolError("malformed request line"),
            ),
            (
                "BREW / HTTP/1.1\r\n\r\n",
                HTTPError::ProtocolError("unknown http method"),
            ),
            (
                "GET / HTTP/1.1\r\nno colon here\r\n\r\n",
                HTTPError::ProtocolError("malformed header line"),
            ),
            (
                "GET / HTTP/1.1\r\ncontent-length: ten\r\n\r\n",
                HTTPError::ProtocolError("invalid content-length"),
            ),
        ] {
            assert_eq!(
                RequestHead::parse(data.as_bytes()).unwrap_err(),
                expected,
                "data: {:?}",
                data
            );
        }
    }

    #[tokio::test]
    async fn test_read_request_across_reads() {
        let mut conn = TestConnection::new(&[
            "GET /index.html HT".as_bytes(),
            "TP/1.1\r\nContent-Type:".as_bytes(),
            "application/json\r\n\r\n".as_bytes(),
        ]);
        let mut buf = [0u8; 256];

        let req = read_request(&mut conn, &mut buf).await.unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.body_in_hand().is_empty());
    }

    #[tokio::test]
    async fn test_read_request_zero_read() {
        let mut buf = [0u8; 64];

        let mut conn = TestConnection::new(&[]);
        let res = read_request(&mut conn, &mut buf).await;
        assert_eq!(res.err(), Some(HTTPError::ZeroRead));

        let mut conn = TestConnection::new(&[]).reset_when_drained();
        let res = read_request(&mut conn, &mut buf).await;
        assert_eq!(res.err(), Some(HTTPError::ZeroRead));
    }

    #[tokio::test]
    async fn test_read_request_short_read() {
        let mut buf = [0u8; 64];
        let mut conn = TestConnection::new(&["GET / HTTP/1.1\r\n".as_bytes()]);
        let res = read_request(&mut conn, &mut buf).await;
        assert_eq!(res.err(), Some(HTTPError::ShortRead));

        // headers larger than the buffer
        let mut buf = [0u8; 16];
        let mut conn = TestConnection::new(&["GET /a/very/long/path HTTP/1.1\r\n\r\n".as_bytes()]);
        let res = read_request(&mut conn, &mut buf).await;
        assert_eq!(res.err(), Some(HTTPError::ShortRead));
    }

    #[tokio::test]
    async fn test_body_continues_from_connection() {
        let head = "PUT /upload HTTP/1.1\r\nContent-Length: 11\r\n\r\n";

        for split in 0..=11 {
            let first = [head, &"hello world"[..split]].concat();
            let rest = "hello world"[split..].to_string();
            let mut conn = TestConnection::new(&[first.as_bytes(), rest.as_bytes()]);
            let mut buf = [0u8; 128];

            let mut req = read_request(&mut conn, &mut buf).await.unwrap();
            assert_eq!(req.method, Method::PUT);
            assert_eq!(req.content_length(), Some(11));
            assert_eq!(req.body_in_hand().len(), split);

            let body = req.read_body_to_end().await.unwrap();
            assert_eq!(body, "hello world".as_bytes(), "split: {}", split);
        }
    }

    #[tokio::test]
    async fn test_body_is_capped_at_content_length() {
        let mut conn = TestConnection::new(&[
            "POST / HTTP/1.1\r\ncontent-length: 3\r\n\r\nabcdef".as_bytes(),
        ]);
        let mut buf = [0u8; 128];

        let mut req = read_request(&mut conn, &mut buf).await.unwrap();
        assert_eq!(req.body_in_hand(), "abc".as_bytes());
        assert_eq!(req.read_body_to_end().await.unwrap(), "abc".as_bytes());
    }

    #[tokio::test]
    async fn test_body_without_content_length() {
        let mut conn = TestConnection::new(&["POST / HTTP/1.1\r\n\r\nxyz".as_bytes()]);
        let mut buf = [0u8; 128];

        let mut req = read_request(&mut conn, &mut buf).await.unwrap();
        assert_eq!(req.content_length(), None);
        assert_eq!(req.read_body_to_end().await.unwrap(), "xyz".as_bytes());
    }

    #[tokio::test]
    async fn test_body_truncated_by_peer() {
        let mut conn = TestConnection::new(&[
            "PUT / HTTP/1.1\r\ncontent-length: 10\r\n\r\nabc".as_bytes(),
        ]);
        let mut buf = [0u8; 128];

        let mut req = read_request(&mut conn, &mut buf).await.unwrap();
        assert_eq!(
            req.read_body_to_end().await.unwrap_err(),
            HTTPError::Disconnected
        );
    }

    #[tokio::test]
    async fn test_send_continue() {
        let mut conn = TestConnection::new(&[
            "PUT / HTTP/1.1\r\nexpect: 100-continue\r\ncontent-length: 2\r\n\r\n".as_bytes(),
            "ok".as_bytes(),
        ]);
        let mut buf = [0u8; 128];

        let mut req = read_request(&mut conn, &mut buf).await.unwrap();
        req.send_continue().await.unwrap();
        assert_eq!(req.read_body_to_end().await.unwrap(), "ok".as_bytes());
        assert_eq!(conn.written_str(), "HTTP/1.1 100 Continue\r\n\r\n");
    }
}
