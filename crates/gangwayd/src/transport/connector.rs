//! The socket connector: bind, accept, dispatch to the worker pool.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use gangway_config::SocketEndpoint;

use super::errors::ConnectorError;
use super::handler::{ConnectionHandler, ConnectionStream};
use super::pool::WorkerPool;
use super::TRANSPORT_TARGET;

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Lifecycle states of the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectorState {
    /// Constructed, not yet bound.
    New = 0,
    /// Binding the listening socket.
    Starting = 1,
    /// Accepting connections.
    Running = 2,
    /// Stop requested; draining in-flight connections.
    Stopping = 3,
    /// Shut down cleanly.
    Terminated = 4,
    /// Shut down abnormally.
    Failed = 5,
}

impl ConnectorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::New,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Terminated,
            _ => Self::Failed,
        }
    }
}

/// Shared, atomically updated connector state.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectorState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ConnectorState {
        ConnectorState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: ConnectorState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A bound, not-yet-started connector.
#[derive(Debug)]
pub struct SocketConnector {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
    pool: WorkerPool,
    socket_timeout: Duration,
    state: Arc<StateCell>,
}

impl SocketConnector {
    /// Binds the configured endpoint.
    ///
    /// # Errors
    ///
    /// [`ConnectorError`] when resolution, binding, or stale-socket
    /// handling fails; a bind failure is fatal to daemon startup.
    pub fn bind(
        endpoint: &SocketEndpoint,
        pool: WorkerPool,
        socket_timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        let state = Arc::new(StateCell::new(ConnectorState::New));
        state.store(ConnectorState::Starting);
        let listener = match endpoint {
            SocketEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    ListenerKind::Unix(bind_unix(path.as_std_path())?)
                }

                #[cfg(not(unix))]
                {
                    return Err(ConnectorError::UnsupportedUnix {
                        endpoint: endpoint.to_string(),
                    });
                }
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
            pool,
            socket_timeout,
            state,
        })
    }

    /// The bound local address, when the endpoint is TCP.
    ///
    /// Lets tests and operators discover the port after binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        }
    }

    /// Starts the accept loop on a background thread.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::NonBlocking`] when the listener cannot be
    /// switched to polled accepts and [`ConnectorError::SpawnAccept`] when
    /// the accept thread cannot be created.
    pub fn start(self, handler: Arc<dyn ConnectionHandler>) -> Result<ConnectorHandle, ConnectorError> {
        if let Err(source) = match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener.set_nonblocking(true),
        } {
            #[cfg(unix)]
            cleanup_unix_socket(&self.endpoint);
            return Err(ConnectorError::NonBlocking { source });
        }

        let state = Arc::clone(&self.state);
        let pool = self.pool.clone();
        let local_addr = self.local_addr();
        state.store(ConnectorState::Running);
        let thread = thread::Builder::new()
            .name("gangway-accept".into())
            .spawn(move || run_accept_loop(self, &handler))
            .map_err(|source| ConnectorError::SpawnAccept { source })?;
        Ok(ConnectorHandle {
            state,
            pool,
            local_addr,
            thread: Some(thread),
        })
    }
}

/// Handle to a running connector.
#[derive(Debug)]
pub struct ConnectorHandle {
    state: Arc<StateCell>,
    pool: WorkerPool,
    local_addr: Option<SocketAddr>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ConnectorHandle {
    /// The connector's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.state.load()
    }

    /// The bound local address, when the endpoint is TCP.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops accepting, drains the worker pool, and joins the accept
    /// thread.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::ThreadPanic`] when the accept thread panicked and
    /// [`ConnectorError::ShutdownTimeout`] when in-flight connections
    /// outlived the grace period; both leave the connector `Failed`.
    pub fn stop(mut self, shutdown_timeout: Duration) -> Result<(), ConnectorError> {
        self.state.store(ConnectorState::Stopping);
        // Shut the pool down first: it wakes an accept thread blocked on a
        // saturated pool, so the join below cannot deadlock.
        let drained = self.pool.shutdown(shutdown_timeout);
        let joined = match self.thread.take() {
            Some(thread) => thread.join().is_ok(),
            None => true,
        };

        if !joined {
            self.state.store(ConnectorState::Failed);
            return Err(ConnectorError::ThreadPanic);
        }
        if !drained {
            self.state.store(ConnectorState::Failed);
            return Err(ConnectorError::ShutdownTimeout);
        }
        self.state.store(ConnectorState::Terminated);
        Ok(())
    }
}

impl Drop for ConnectorHandle {
    fn drop(&mut self) {
        let state = self.state.load();
        if state == ConnectorState::Running {
            self.state.store(ConnectorState::Stopping);
        }
    }
}

fn run_accept_loop(connector: SocketConnector, handler: &Arc<dyn ConnectionHandler>) {
    info!(
        target: TRANSPORT_TARGET,
        endpoint = %connector.endpoint,
        "connector accepting connections"
    );
    let mut last_error = None::<io::ErrorKind>;
    while connector.state.load() == ConnectorState::Running {
        match accept_connection(&connector.listener) {
            Ok(Some(stream)) => {
                last_error = None;
                if let Err(error) = stream.set_timeouts(connector.socket_timeout) {
                    warn!(target: TRANSPORT_TARGET, %error, "failed to set socket timeouts");
                }
                let handler = Arc::clone(handler);
                // Submitting blocks while the pool is saturated, which is
                // exactly the accept-side backpressure we want.
                if let Err(error) = connector.pool.execute(move || handler.handle(stream)) {
                    warn!(target: TRANSPORT_TARGET, %error, "dropped connection");
                }
            }
            Ok(None) => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(target: TRANSPORT_TARGET, %error, "socket accept error");
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    #[cfg(unix)]
    cleanup_unix_socket(&connector.endpoint);
}

fn accept_connection(listener: &ListenerKind) -> Result<Option<ConnectionStream>, io::Error> {
    match listener {
        ListenerKind::Tcp(tcp) => match tcp.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(ConnectionStream::Tcp(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
        #[cfg(unix)]
        ListenerKind::Unix(unix) => match unix.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(ConnectionStream::Unix(stream)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ConnectorError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ConnectorError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ConnectorError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ConnectorError::BindTcp { addr, source })
}

/// Binds a Unix listener, reclaiming a stale socket file when its previous
/// owner is gone.
#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ConnectorError> {
    let display = path.display().to_string();
    match fs::metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(ConnectorError::UnixNotSocket { path: display });
            }
            // A connectable socket means another daemon instance owns it.
            if UnixStream::connect(path).is_ok() {
                return Err(ConnectorError::UnixInUse { path: display });
            }
            fs::remove_file(path).map_err(|source| ConnectorError::UnixCleanup {
                path: display.clone(),
                source,
            })?;
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ConnectorError::UnixMetadata {
                path: display,
                source,
            });
        }
    }
    UnixListener::bind(path).map_err(|source| ConnectorError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    if let Some(path) = endpoint.unix_path() {
        if let Err(error) = fs::remove_file(path.as_std_path()) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(target: TRANSPORT_TARGET, %error, "failed to remove socket file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream;
    use std::sync::Mutex;
    use std::time::Instant;

    use rstest::{fixture, rstest};

    use gangway_config::PoolSettings;

    use super::*;

    struct CountingHandler {
        served: Mutex<usize>,
    }

    impl ConnectionHandler for CountingHandler {
        fn handle(&self, _stream: ConnectionStream) {
            *self.served.lock().expect("handler lock") += 1;
        }
    }

    #[fixture]
    fn pool() -> WorkerPool {
        WorkerPool::new(PoolSettings {
            min_workers: 1,
            max_workers: 4,
            keep_alive_secs: 60,
            shutdown_timeout_secs: 5,
        })
    }

    #[fixture]
    fn tcp_endpoint() -> SocketEndpoint {
        SocketEndpoint::tcp("127.0.0.1", 0)
    }

    fn wait_for(probe: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if probe() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[rstest]
    fn accepts_connections_and_reaches_terminated(tcp_endpoint: SocketEndpoint, pool: WorkerPool) {
        let connector =
            SocketConnector::bind(&tcp_endpoint, pool, Duration::from_secs(5)).expect("bind");
        let handler = Arc::new(CountingHandler {
            served: Mutex::new(0),
        });
        let shared: Arc<dyn ConnectionHandler> = handler.clone();
        let handle = connector.start(shared).expect("start");
        assert_eq!(handle.state(), ConnectorState::Running);
        let addr = handle.local_addr().expect("tcp local addr");

        TcpStream::connect(addr).expect("first client");
        TcpStream::connect(addr).expect("second client");
        assert!(wait_for(|| *handler.served.lock().expect("count") >= 2));

        handle.stop(Duration::from_secs(5)).expect("stop");
    }

    #[rstest]
    fn stop_with_idle_pool_terminates_promptly(tcp_endpoint: SocketEndpoint, pool: WorkerPool) {
        let connector =
            SocketConnector::bind(&tcp_endpoint, pool, Duration::from_secs(5)).expect("bind");
        let handler = Arc::new(CountingHandler {
            served: Mutex::new(0),
        });
        let shared: Arc<dyn ConnectionHandler> = handler;
        let handle = connector.start(shared).expect("start");
        let started = Instant::now();
        handle.stop(Duration::from_secs(5)).expect("stop");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[rstest]
    fn binding_an_occupied_port_fails(tcp_endpoint: SocketEndpoint) {
        let first = SocketConnector::bind(&tcp_endpoint, pool(), Duration::from_secs(5))
            .expect("bind ephemeral");
        let port = first.local_addr().expect("addr").port();
        let second = SocketConnector::bind(
            &SocketEndpoint::tcp("127.0.0.1", port),
            pool(),
            Duration::from_secs(5),
        );
        assert!(matches!(second, Err(ConnectorError::BindTcp { .. })));
    }

    #[cfg(unix)]
    #[rstest]
    fn reclaims_stale_unix_socket_files(pool: WorkerPool) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("gangwayd.sock");
        {
            let _stale = std::os::unix::net::UnixListener::bind(&path).expect("stale listener");
        }
        assert!(path.exists(), "stale socket file should remain");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let connector = SocketConnector::bind(&endpoint, pool, Duration::from_secs(5))
            .expect("bind over stale socket");
        drop(connector);
    }

    #[cfg(unix)]
    #[rstest]
    fn refuses_a_socket_served_by_another_instance(pool: WorkerPool) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("gangwayd.sock");
        let _live = std::os::unix::net::UnixListener::bind(&path).expect("live listener");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let bound = SocketConnector::bind(&endpoint, pool, Duration::from_secs(5));
        assert!(matches!(bound, Err(ConnectorError::UnixInUse { .. })));
    }
}
