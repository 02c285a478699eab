use alloc::format;
use alloc::vec;
use core::future::Future;
use embassy_futures::join::join_array;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embedded_io_async::{ErrorType, Read, Write};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::request::read_request;
use crate::response::{Response, send, set_cors_enabled};
use crate::router::{HandlerError, Router};
use crate::{Close, ConfigError, Connection, HTTPError, ServerConfig, ServerConfigUpdate};

/// Hands out connections to a cooperative accept loop.
pub trait Acceptor {
    type Conn: Connection;

    fn accept(&self) -> impl Future<Output = Result<Self::Conn, HTTPError>>;
}

/// Hands out connections to a blocking accept loop.
pub trait BlockingAcceptor {
    type Conn: embedded_io::Read + embedded_io::Write + Close;

    fn accept(&self) -> Result<Self::Conn, HTTPError>;
}

/// Adapts a blocking `embedded_io` stream to the async traits. Every await
/// completes immediately, so the connection can be driven with `block_on`.
pub struct Blocking<T>(pub T);

impl<T: ErrorType> ErrorType for Blocking<T> {
    type Error = T::Error;
}

impl<T: embedded_io::Read> Read for Blocking<T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf)
    }
}

impl<T: embedded_io::Write> Write for Blocking<T> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.write(buf)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush()
    }
}

impl<T: Close> Close for Blocking<T> {
    fn close(&mut self) {
        self.0.close();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ConnectionState {
    Accepted,
    Parsing,
    Dispatching,
    Failed,
    Responding,
    Closed,
}

impl ConnectionState {
    fn enter(&mut self, next: ConnectionState) {
        trace!("connection {:?} -> {:?}", *self, next);
        *self = next;
    }
}

/// Serves the single request on `conn` and closes it.
///
/// Nothing escapes: a failure to parse or handle the request is answered
/// with a `500`, and a failure to send that is only logged.
pub async fn serve_connection<C: Connection>(router: &Router<C>, conn: &mut C, buf: &mut [u8]) {
    let mut state = ConnectionState::Accepted;

    state.enter(ConnectionState::Parsing);
    let outcome = match read_request(conn, buf).await {
        Ok(request) => {
            state.enter(ConnectionState::Dispatching);
            router.dispatch(request).await
        }
        Err(HTTPError::ZeroRead) => {
            debug!("peer closed without sending a request");
            Ok(())
        }
        Err(e) => Err(HandlerError::Http(e)),
    };

    match outcome {
        Ok(()) => {}
        Err(HandlerError::Http(HTTPError::NotUpgradeable)) => {
            warn!("websocket upgrade without a key, dropping connection");
        }
        Err(e) => {
            state.enter(ConnectionState::Failed);
            error!("request failed: {}", e);

            state.enter(ConnectionState::Responding);
            let details = format!("{}", e);
            if let Err(e) = send(conn, Response::server_error(Some(&details)), true).await {
                error!("could not send error response: {:?}", e);
            }
        }
    }

    conn.close();
    state.enter(ConnectionState::Closed);
}

/// Reads the stored config. A device that was never configured, or whose
/// stored config cannot be read, runs with the defaults.
pub fn load_config<S: ReadNorFlash>(storage: &mut S) -> ServerConfig {
    match ServerConfig::load(storage) {
        Ok(config) => config,
        Err(ConfigError::Missing) => {
            info!("no stored config, using defaults");
            ServerConfig::default()
        }
        Err(e) => {
            error!("error loading config: {:?}. proceeding with defaults", e);
            ServerConfig::default()
        }
    }
}

/// Applies a partial JSON config update on top of the stored config and
/// saves the result. The CORS switch takes effect immediately; buffer sizes
/// apply to listeners created afterwards.
pub fn update_config<S: NorFlash>(
    storage: &mut S,
    update: &[u8],
) -> Result<ServerConfig, ConfigError> {
    let update = ServerConfigUpdate::from_json(update)?;
    let mut config = load_config(storage);
    config.update(&update)?;
    config.save(storage)?;

    set_cors_enabled(config.enable_cors);
    info!("config updated");
    Ok(config)
}

/// Accepts connections and serves each with a [`Router`].
pub struct Listener<'a, C> {
    router: &'a Router<C>,
    buffer_size: usize,
}

impl<'a, C> Listener<'a, C> {
    /// Also applies `config.enable_cors` to every response built from now on.
    pub fn new(router: &'a Router<C>, config: &ServerConfig) -> Self {
        set_cors_enabled(config.enable_cors);
        Self {
            router,
            buffer_size: config.request_buffer_size,
        }
    }
}

impl<'a, C: Connection> Listener<'a, C> {
    /// Serves one connection at a time until `stop` is signalled. A pending
    /// accept is abandoned and a connection being served, such as an event
    /// stream that never ends, is closed.
    pub async fn serve<A, M>(&self, acceptor: &A, stop: &Signal<M, ()>) -> Result<(), HTTPError>
    where
        A: Acceptor<Conn = C>,
        M: RawMutex,
    {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            if stop.signaled() {
                break;
            }

            let mut conn = match select(acceptor.accept(), stop.wait()).await {
                Either::First(Ok(conn)) => conn,
                Either::First(Err(e)) => {
                    error!("accept failed: {:?}", e);
                    return Err(e);
                }
                Either::Second(()) => {
                    // wait() consumed the signal, raise it again for any sibling loops
                    stop.signal(());
                    break;
                }
            };

            info!("connection accepted");
            let served = select(
                serve_connection(self.router, &mut conn, &mut buf),
                stop.wait(),
            )
            .await;
            if let Either::Second(()) = served {
                // a long-lived connection was interrupted
                conn.close();
                stop.signal(());
                break;
            }
        }

        info!("listener stopped");
        Ok(())
    }

    /// Runs `N` accept loops interleaved on the current task, so up to `N`
    /// connections are served at once. Returns the first loop error.
    pub async fn serve_concurrent<const N: usize, A, M>(
        &self,
        acceptor: &A,
        stop: &Signal<M, ()>,
    ) -> Result<(), HTTPError>
    where
        A: Acceptor<Conn = C>,
        M: RawMutex,
    {
        let results = join_array(core::array::from_fn::<_, N, _>(|_| {
            self.serve(acceptor, stop)
        }))
        .await;

        results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
    }
}

impl<'a, T> Listener<'a, Blocking<T>>
where
    T: embedded_io::Read + embedded_io::Write + Close,
{
    /// Accepts and fully serves one connection at a time, blocking the
    /// calling thread. `stop` is checked between connections.
    pub fn serve_blocking<A, M>(&self, acceptor: &A, stop: &Signal<M, ()>) -> Result<(), HTTPError>
    where
        A: BlockingAcceptor<Conn = T>,
        M: RawMutex,
    {
        let mut buf = vec![0u8; self.buffer_size];

        while !stop.signaled() {
            let conn = acceptor.accept().inspect_err(|e| {
                error!("accept failed: {:?}", e);
            })?;

            info!("connection accepted");
            let mut conn = Blocking(conn);
            embassy_futures::block_on(serve_connection(self.router, &mut conn, &mut buf));
        }

        info!("listener stopped");
        Ok(())
    }
}
