//! Wrappers that turn one kind of handler into a [`Handler`], to be composed
//! when a route is registered:
//!
//! ```ignore
//! router.route("/events", &[Method::GET], None, event_source(256, |mut events, _params| {
//!     Box::pin(async move {
//!         events.send(&Reading { temperature: 21 }).await?;
//!         Ok(None)
//!     })
//! }))?;
//! ```

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::marker::PhantomData;
use embedded_io_async::{Read, Write};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::content_type::{APPLICATION_JSON, TEXT_EVENT_STREAM};
use crate::header::{CACHE_CONTROL, CONTENT_TYPE, Headers};
use crate::query::Params;
use crate::request::Request;
use crate::response::{Body, Response, StatusCode, send};
use crate::router::{Handler, HandlerError, HandlerResult};
use crate::websocket::{Websocket, upgrade};
use crate::{BoxFuture, Close, HTTPError};

/// Largest JSON document serialized into a response body or an event.
const MAX_JSON_LEN: usize = 16 * 1024;

/// Serializes `value` into `buf`, returning the number of bytes written.
fn to_json<T: Serialize>(value: &T, buf: &mut [u8]) -> Result<usize, HTTPError> {
    serde_json_core::to_slice(value, buf).map_err(|e| match e {
        serde_json_core::ser::Error::BufferFull => HTTPError::Serialization("buffer full"),
        _ => HTTPError::Serialization("could not serialize value"),
    })
}

/// Like [`to_json`], doubling `buf` until the value fits or `buf` would
/// exceed [`MAX_JSON_LEN`]. `buf` keeps its grown size for the next call.
fn to_json_growing<T: Serialize>(value: &T, buf: &mut Vec<u8>) -> Result<usize, HTTPError> {
    if buf.is_empty() {
        buf.resize(64, 0);
    }

    loop {
        match to_json(value, buf) {
            Err(HTTPError::Serialization("buffer full")) if buf.len() < MAX_JSON_LEN => {
                let len = (buf.len() * 2).min(MAX_JSON_LEN);
                buf.resize(len, 0);
            }
            res => return res,
        }
    }
}

/// A reply whose value becomes a JSON body.
pub struct Json<T> {
    pub status: StatusCode,
    pub headers: Headers,
    pub value: T,
}

impl<T: Serialize> Json<T> {
    pub fn ok(value: T) -> Self {
        Self {
            status: StatusCode::OK,
            headers: Headers::new(),
            value,
        }
    }

    pub fn into_response(self) -> Result<Response, HTTPError> {
        let mut buf = vec![0u8; 256];
        let len = to_json_growing(&self.value, &mut buf)?;
        buf.truncate(len);

        let body = String::from_utf8(buf).or(Err(HTTPError::Serialization("invalid utf8")))?;
        Ok(Response::new(self.status, Body::Text(body))
            .with_headers(&self.headers)
            .with_header(CONTENT_TYPE, APPLICATION_JSON))
    }
}

pub struct JsonRequest<F, T> {
    handler: F,
    _data: PhantomData<fn() -> T>,
}

/// Parses a JSON request body into `T` and hands it to `handler`. A request
/// that is not `application/json`, or whose body does not parse, gets a `400`.
pub fn json_request<C, T, F>(handler: F) -> JsonRequest<F, T>
where
    T: DeserializeOwned,
    F: for<'r> Fn(Request<'r, C>, Params, T) -> BoxFuture<'r, HandlerResult>,
{
    JsonRequest {
        handler,
        _data: PhantomData,
    }
}

impl<F, T: DeserializeOwned> JsonRequest<F, T> {
    async fn handle<'r, C>(&'r self, mut req: Request<'r, C>, params: Params) -> HandlerResult
    where
        C: Read,
        F: for<'a> Fn(Request<'a, C>, Params, T) -> BoxFuture<'a, HandlerResult>,
    {
        if req.header(CONTENT_TYPE) != Some(APPLICATION_JSON) {
            return Ok(Some(Response::bad_request(Some(
                "Expected Content-Type: application/json",
            ))));
        }

        let body = req.read_body_to_end().await?;
        // unescaped strings are never longer than their escaped form
        let mut unescaped = vec![0u8; body.len()];
        let data = match serde_json_core::from_slice_escaped::<T>(&body, &mut unescaped) {
            Ok((data, _)) => data,
            Err(_) => {
                return Ok(Some(Response::bad_request(Some(
                    "Could not parse request body as JSON",
                ))));
            }
        };

        (self.handler)(req, params, data).await
    }
}

impl<C, T, F> Handler<C> for JsonRequest<F, T>
where
    C: Read,
    T: DeserializeOwned,
    F: for<'r> Fn(Request<'r, C>, Params, T) -> BoxFuture<'r, HandlerResult>,
{
    fn call<'r>(&'r self, req: Request<'r, C>, params: Params) -> BoxFuture<'r, HandlerResult> {
        Box::pin(self.handle(req, params))
    }
}

pub struct JsonResponse<F, T> {
    handler: F,
    _value: PhantomData<fn() -> T>,
}

/// Sends the [`Json`] returned by `handler` as an `application/json` body.
pub fn json_response<C, T, F>(handler: F) -> JsonResponse<F, T>
where
    T: Serialize,
    F: for<'r> Fn(Request<'r, C>, Params) -> BoxFuture<'r, Result<Json<T>, HandlerError>>,
{
    JsonResponse {
        handler,
        _value: PhantomData,
    }
}

impl<C, T, F> Handler<C> for JsonResponse<F, T>
where
    T: Serialize,
    F: for<'r> Fn(Request<'r, C>, Params) -> BoxFuture<'r, Result<Json<T>, HandlerError>>,
{
    fn call<'r>(&'r self, req: Request<'r, C>, params: Params) -> BoxFuture<'r, HandlerResult> {
        Box::pin(respond_json((self.handler)(req, params)))
    }
}

async fn respond_json<T: Serialize>(
    reply: BoxFuture<'_, Result<Json<T>, HandlerError>>,
) -> HandlerResult {
    let response = reply.await?.into_response()?;
    Ok(Some(response))
}

/// A server-sent event stream over a connection that stays open.
pub struct EventStream<'r, C> {
    request: Request<'r, C>,
    scratch: Vec<u8>,
}

impl<'r, C: Write> EventStream<'r, C> {
    /// Writes `data` as one `data: <json>\n\n` event and flushes it.
    pub async fn send<T: Serialize>(&mut self, data: &T) -> Result<(), HTTPError> {
        let n = to_json_growing(data, &mut self.scratch)?;
        let conn = self.request.connection();

        conn.write_all("data: ".as_bytes())
            .await
            .or(Err(HTTPError::Disconnected))?;
        conn.write_all(&self.scratch[..n])
            .await
            .or(Err(HTTPError::Disconnected))?;
        conn.write_all("\n\n".as_bytes())
            .await
            .or(Err(HTTPError::Disconnected))?;
        conn.flush().await.or(Err(HTTPError::Disconnected))
    }

    pub fn request(&self) -> &Request<'r, C> {
        &self.request
    }
}

pub struct EventSource<F> {
    capacity: usize,
    handler: F,
}

/// Starts an event stream and hands it to `handler`. Events are serialized
/// through a buffer starting at `capacity` bytes, normally
/// [`ServerConfig::event_buffer_size`](crate::ServerConfig), which grows for
/// larger events up to 16 KiB.
pub fn event_source<C, F>(capacity: usize, handler: F) -> EventSource<F>
where
    F: for<'r> Fn(EventStream<'r, C>, Params) -> BoxFuture<'r, HandlerResult>,
{
    EventSource { capacity, handler }
}

impl<F> EventSource<F> {
    async fn handle<'r, C>(&'r self, mut req: Request<'r, C>, params: Params) -> HandlerResult
    where
        C: Write + Close,
        F: for<'a> Fn(EventStream<'a, C>, Params) -> BoxFuture<'a, HandlerResult>,
    {
        let preamble = Response::ok(Body::Empty)
            .with_header(CACHE_CONTROL, "no-cache")
            .with_header(CONTENT_TYPE, TEXT_EVENT_STREAM);
        send(req.connection(), preamble, false).await?;
        debug!("event stream opened");

        let events = EventStream {
            request: req,
            scratch: vec![0u8; self.capacity],
        };
        (self.handler)(events, params).await
    }
}

impl<C, F> Handler<C> for EventSource<F>
where
    C: Write + Close,
    F: for<'r> Fn(EventStream<'r, C>, Params) -> BoxFuture<'r, HandlerResult>,
{
    fn call<'r>(&'r self, req: Request<'r, C>, params: Params) -> BoxFuture<'r, HandlerResult> {
        Box::pin(self.handle(req, params))
    }
}

pub struct WebsocketUpgrade<F> {
    handler: F,
}

/// Performs the websocket handshake and hands the upgraded connection to
/// `handler`.
pub fn websocket<C, F>(handler: F) -> WebsocketUpgrade<F>
where
    F: for<'r> Fn(Websocket<'r, C>, Params) -> BoxFuture<'r, HandlerResult>,
{
    WebsocketUpgrade { handler }
}

impl<C, F> Handler<C> for WebsocketUpgrade<F>
where
    C: Write,
    F: for<'r> Fn(Websocket<'r, C>, Params) -> BoxFuture<'r, HandlerResult>,
{
    fn call<'r>(&'r self, req: Request<'r, C>, params: Params) -> BoxFuture<'r, HandlerResult> {
        Box::pin(self.handle(req, params))
    }
}

impl<F> WebsocketUpgrade<F> {
    async fn handle<'r, C>(&'r self, req: Request<'r, C>, params: Params) -> HandlerResult
    where
        C: Write,
        F: for<'a> Fn(Websocket<'a, C>, Params) -> BoxFuture<'a, HandlerResult>,
    {
        let ws = upgrade(req).await?;
        (self.handler)(ws, params).await
    }
}
