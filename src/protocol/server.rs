use std::{
    collections::HashMap,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, error, info, trace, warn};

use crate::{
    auth::{AuthBridge, Authenticator},
    config::ServerConfig,
    executor::QueryExecutor,
};

use super::{ChunkedTransport, Session, ThreadPool, TransportError, session::ServerContext};

/// Open connections, so shutdown can hang up on them.
type LiveConnections = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// Accepts Bolt connections and runs one [`Session`] per connection on a
/// fixed pool of `max_connections` workers.
pub struct BoltServer {
    listener: TcpListener,
    config: ServerConfig,
    executor: Arc<dyn QueryExecutor>,
    auth: Option<AuthBridge>,
    closed: Arc<AtomicBool>,
    live: LiveConnections,
}

impl BoltServer {
    /// Binds the listening socket. Without an authenticator every HELLO is
    /// admitted with the admin role, unless `require_auth` is set.
    pub fn bind(config: ServerConfig, executor: Arc<dyn QueryExecutor>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.address)?;
        Ok(Self {
            listener,
            config,
            executor,
            auth: None,
            closed: Arc::new(AtomicBool::new(false)),
            live: Arc::default(),
        })
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.auth =
            Some(AuthBridge::new(authenticator).with_anonymous(self.config.allow_anonymous));
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        Ok(ShutdownHandle {
            closed: Arc::clone(&self.closed),
            live: Arc::clone(&self.live),
            wake: wake_address(self.local_addr()?),
        })
    }

    /// Serves connections until shut down. Returns once every connection
    /// that was still open has finished.
    pub fn listen(self) -> Result<(), TransportError> {
        info!("listening at {}", self.listener.local_addr()?);

        let pool = ThreadPool::new(self.config.max_connections);
        let context = Arc::new(ServerContext {
            config: self.config,
            executor: self.executor,
            auth: self.auth,
        });
        let mut next_id: u64 = 0;

        for stream in self.listener.incoming() {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("broken connection: {e:?}");
                    continue;
                }
            };

            next_id += 1;
            let id = next_id;
            let handle = match stream.try_clone() {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("bolt-{id}: failed to register connection: {e}");
                    continue;
                }
            };
            {
                // Checked under the lock so shutdown cannot miss this stream.
                let mut live = lock(&self.live);
                if self.closed.load(Ordering::SeqCst) {
                    break;
                }
                live.insert(id, handle);
            }

            let context = Arc::clone(&context);
            let entry = LiveEntry {
                id,
                live: Arc::clone(&self.live),
            };
            let queued = pool.execute(move || {
                let _entry = entry;
                handle_connection(stream, id, context);
            });
            if !queued {
                warn!("bolt-{id}: worker pool is gone, dropping connection");
            }
        }

        info!("no longer accepting connections");
        Ok(())
    }
}

/// Stops a running [`BoltServer`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    closed: Arc<AtomicBool>,
    live: LiveConnections,
    wake: SocketAddr,
}

impl ShutdownHandle {
    /// Stops accepting and hangs up on open connections. Sessions see the
    /// peer go away and tear down as usual.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for (id, stream) in lock(&self.live).iter() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("bolt-{id}: shutdown: {e}");
            }
        }

        // The accept loop only notices the flag once accept returns.
        if let Err(e) = TcpStream::connect(self.wake) {
            debug!("failed to wake accept loop: {e}");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One registered connection. Dropping it hangs up the socket and forgets
/// it, however the handler ended.
struct LiveEntry {
    id: u64,
    live: LiveConnections,
}

impl Drop for LiveEntry {
    fn drop(&mut self) {
        let stream = lock(&self.live).remove(&self.id);
        if let Some(stream) = stream
            && let Err(e) = stream.shutdown(Shutdown::Both)
        {
            trace!("bolt-{}: shutdown after close: {e}", self.id);
        }
    }
}

fn lock(live: &LiveConnections) -> std::sync::MutexGuard<'_, HashMap<u64, TcpStream>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A listener on the unspecified address is reachable over loopback.
fn wake_address(mut addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => addr.set_ip(Ipv4Addr::LOCALHOST.into()),
        IpAddr::V6(ip) if ip.is_unspecified() => addr.set_ip(Ipv6Addr::LOCALHOST.into()),
        _ => {}
    }
    addr
}

fn handle_connection(stream: TcpStream, id: u64, context: Arc<ServerContext>) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    debug!("bolt-{id}: accepted connection from {peer}");

    if let Err(e) = stream.set_nodelay(true) {
        debug!("bolt-{id}: failed to set TCP_NODELAY: {e}");
    }
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(e) => {
            warn!("bolt-{id}: failed to split stream: {e}");
            return;
        }
    };

    let transport = ChunkedTransport::with_capacity(
        context.config.read_buffer_size,
        context.config.write_buffer_size,
        reader,
        stream,
    )
    .with_max_message_size(context.config.max_message_size);
    let session = Session::new(transport, context, id, peer.as_str());
    match panic::catch_unwind(AssertUnwindSafe(move || session.run())) {
        Ok(Ok(())) => debug!("bolt-{id}: {peer} said goodbye"),
        Ok(Err(e)) if e.is_disconnect() => debug!("bolt-{id}: {peer} disconnected"),
        Ok(Err(e)) => warn!("bolt-{id}: closing connection from {peer}: {e}"),
        Err(_) => error!("bolt-{id}: handler panicked, closing connection from {peer}"),
    }
}
