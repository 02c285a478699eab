use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{Display, Formatter};
use embedded_io_async::{Read, Write};
use regex_automata::meta::Regex;
use regex_automata::{Anchored, Input};

use crate::query::{Invalid, Params, Schema};
use crate::request::{Method, Request};
use crate::response::{Response, send};
use crate::{BoxFuture, Close, HTTPError};

/// Why a handler could not produce a response. Turned into a `500` carrying
/// the `Display` text.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandlerError {
    Http(HTTPError),
    Failed(String),
}

impl From<HTTPError> for HandlerError {
    fn from(e: HTTPError) -> Self {
        Self::Http(e)
    }
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "{}", e),
            Self::Failed(e) => f.write_str(e),
        }
    }
}

/// `Ok(None)` means the handler has already answered on the connection.
pub type HandlerResult = Result<Option<Response>, HandlerError>;

pub trait Handler<C> {
    fn call<'r>(&'r self, req: Request<'r, C>, params: Params) -> BoxFuture<'r, HandlerResult>;
}

impl<C, F> Handler<C> for F
where
    F: for<'r> Fn(Request<'r, C>, Params) -> BoxFuture<'r, HandlerResult>,
{
    fn call<'r>(&'r self, req: Request<'r, C>, params: Params) -> BoxFuture<'r, HandlerResult> {
        self(req, params)
    }
}

/// Fixes the signature of a closure so it can be used as a [`Handler`]:
///
/// ```ignore
/// router.route("/", &[Method::GET], None, handler(|_req, _params| {
///     Box::pin(async move { Ok(Some(Response::ok("hello"))) })
/// }))?;
/// ```
pub fn handler<C, F>(f: F) -> F
where
    F: for<'r> Fn(Request<'r, C>, Params) -> BoxFuture<'r, HandlerResult>,
{
    f
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RouteId(usize);

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouteMatch {
    Found(usize),
    MethodNotAllowed,
    NotFound,
}

struct Route<C> {
    regex: Regex,
    methods: Vec<Method>,
    schema: Option<Schema>,
    handler: Box<dyn Handler<C>>,
}

/// Routes in registration order. Built once, then only read.
pub struct Router<C> {
    routes: Vec<Route<C>>,
}

impl<C> Default for Router<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Router<C> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `handler` for paths matching `pattern`. A pattern that
    /// neither starts with `^` nor ends with `$` must match the whole path;
    /// any pattern is matched from the start of the path.
    pub fn route<H>(
        &mut self,
        pattern: &str,
        methods: &[Method],
        schema: Option<Schema>,
        handler: H,
    ) -> Result<RouteId, HTTPError>
    where
        H: Handler<C> + 'static,
    {
        let regex = if !pattern.starts_with('^') && !pattern.ends_with('$') {
            Regex::new(&format!("^{}$", pattern))
        } else {
            Regex::new(pattern)
        }
        .map_err(|e| HTTPError::InvalidRoute(format!("{}: {}", pattern, e)))?;

        self.routes.push(Route {
            regex,
            methods: methods.to_vec(),
            schema,
            handler: Box::new(handler),
        });

        Ok(RouteId(self.routes.len() - 1))
    }

    /// The first route whose pattern matches `path` decides, whatever its
    /// methods are.
    pub fn lookup(&self, method: Method, path: &str) -> RouteMatch {
        let input = Input::new(path).anchored(Anchored::Yes);
        match self
            .routes
            .iter()
            .position(|r| r.regex.is_match(input.clone()))
        {
            Some(i) if self.routes[i].methods.contains(&method) => RouteMatch::Found(i),
            Some(_) => RouteMatch::MethodNotAllowed,
            None => RouteMatch::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<C: Read + Write + Close> Router<C> {
    /// Finds the route for `request`, validates its query and runs its
    /// handler, sending whatever response comes back.
    pub async fn dispatch(&self, mut request: Request<'_, C>) -> Result<(), HandlerError> {
        debug!("{} {}", request.method.as_str(), request.path.as_str());

        let route = match self.lookup(request.method, &request.path) {
            RouteMatch::Found(i) => &self.routes[i],
            RouteMatch::MethodNotAllowed => {
                send(request.connection(), Response::method_not_allowed(), true).await?;
                return Ok(());
            }
            RouteMatch::NotFound => {
                send(request.connection(), Response::not_found(), true).await?;
                return Ok(());
            }
        };

        let params = match &route.schema {
            None => Params::default(),
            Some(schema) => match schema.apply(&request.query) {
                Ok(params) => params,
                Err(invalid) => {
                    let details = format!("invalid params: {}", describe(&invalid));
                    send(request.connection(), Response::bad_request(Some(&details)), true).await?;
                    return Ok(());
                }
            },
        };

        let response = route.handler.call(request.reborrow(), params).await?;
        if let Some(response) = response {
            send(request.connection(), response, true).await?;
        }

        Ok(())
    }
}

fn describe(invalid: &[Invalid]) -> String {
    invalid
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{}=\"{}\"", k, v),
            None => format!("{}=None", k),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
