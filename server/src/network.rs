//! Server network layer: TCP listener and the per-connection request loop

use crate::admission::Admission;
use crate::error::{Rejection, RelayError, Result};
use crate::fanout;
use crate::presence::PresenceHandle;
use crate::registry::{Limits, Registry, SharedRegistry};
use log::{debug, error, info, trace, warn};
use pose_shared::{
    handshake_ack, handshake_error, parse_request, FrameDecoder, Request, DEFAULT_PORT,
    IDLE_TIMEOUT, MAX_PARTIAL_FRAME, USERS_LIMIT,
};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;

const READ_BUFFER_SIZE: usize = 65_535;

/// Listener and connection settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Pending connection queue length passed to `listen`
    pub backlog: u32,
    /// Read inactivity after which a connection is closed
    pub idle_timeout: Duration,
    /// Bytes a connection may buffer without a terminator
    pub max_partial_frame: usize,
    pub limits: Limits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            backlog: USERS_LIMIT as u32,
            idle_timeout: IDLE_TIMEOUT,
            max_partial_frame: MAX_PARTIAL_FRAME,
            limits: Limits::default(),
        }
    }
}

/// Accepts connections and runs one task per connection
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: SharedRegistry,
    admission: Arc<dyn Admission>,
    slots: Arc<Semaphore>,
}

impl Server {
    /// Binds the listening socket with address reuse enabled
    pub async fn bind(
        config: ServerConfig,
        admission: Arc<dyn Admission>,
        presence: PresenceHandle,
    ) -> io::Result<Self> {
        let socket = match config.bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.bind_addr)?;
        let listener = socket.listen(config.backlog)?;
        info!("Server listening on {}", listener.local_addr()?);

        let registry = Registry::new(config.limits, presence).shared();
        let slots = Arc::new(Semaphore::new(config.limits.users));

        Ok(Server {
            listener,
            config,
            registry,
            admission,
            slots,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until the process exits
    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` completes
    ///
    /// Connections already being served keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        // Presence consumers start from an empty server
        self.registry.lock().await.announce();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.admit(stream, addr),
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        }
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        info!("New connection from {}", addr);

        let admission = Arc::clone(&self.admission);
        let slots = Arc::clone(&self.slots);
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();

        tokio::spawn(async move {
            let check = tokio::task::spawn_blocking(move || admission.is_allowed(addr.ip()));
            let allowed = match check.await {
                Ok(allowed) => allowed,
                Err(e) => {
                    error!("Admission check for {} failed: {}", addr, e);
                    false
                }
            };
            if !allowed {
                info!("Connection from {} rejected: IP not in allowlist", addr);
                return;
            }

            let Ok(permit) = slots.try_acquire_owned() else {
                warn!(
                    "Connection from {} rejected: limit of {} users reached",
                    addr, config.limits.users
                );
                return;
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            let _ = serve_connection(stream, addr, registry, &config).await;
            drop(permit);
        });
    }
}

/// Runs one connection to completion and removes its user from the registry
///
/// Whatever ends the loop (peer close, transport error, idle timeout,
/// framing overflow or a policy rejection), the user is disconnected from
/// the registry exactly once before the stream is shut down. The returned
/// value tells why the loop ended.
pub async fn serve_connection<S>(
    mut stream: S,
    user: SocketAddr,
    registry: SharedRegistry,
    config: &ServerConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = connection_loop(&mut stream, user, &registry, config).await;

    match &result {
        Ok(()) => info!("Client disconnected from {}", user),
        Err(RelayError::Rejected(rejection)) => {
            info!("Disconnected user {}: {}", user, rejection)
        }
        Err(RelayError::Frame(e)) => error!("Disconnecting user {}: {}", user, e),
        Err(e) => info!("Error from {}: {}", user, e),
    }

    registry.lock().await.disconnect(user);

    if let Err(e) = stream.shutdown().await {
        debug!("Shutdown of {} failed: {}", user, e);
    }

    result
}

async fn connection_loop<S>(
    stream: &mut S,
    user: SocketAddr,
    registry: &SharedRegistry,
    config: &ServerConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::with_limit(config.max_partial_frame);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = timeout(config.idle_timeout, stream.read(&mut buffer))
            .await
            .map_err(|_| RelayError::IdleTimeout(config.idle_timeout))??;

        if read == 0 {
            return Ok(());
        }

        for message in decoder.push(&buffer[..read])? {
            let reply = {
                let mut registry = registry.lock().await;
                handle_request(&mut registry, user, &message, Instant::now())?
            };

            if let Some(reply) = reply {
                trace!("Sending {} bytes to {}", reply.len(), user);
                stream.write_all(&reply).await?;
            }
        }
    }
}

/// Handles one decoded message and returns the reply, if any
///
/// Malformed messages are logged and produce no reply. A rejection means
/// the connection must be closed.
pub fn handle_request(
    registry: &mut Registry,
    user: SocketAddr,
    message: &[u8],
    now: Instant,
) -> std::result::Result<Option<Vec<u8>>, Rejection> {
    match parse_request(message) {
        Ok(Request::Handshake(Ok(scene))) => {
            let others = registry.other_scenes(user, &scene);
            if !others.is_empty() {
                info!(
                    "{} loaded scene {:?} while others use {:?}",
                    user, scene, others
                );
            }
            registry.record_scene(user, scene);
            Ok(Some(handshake_ack(&others)))
        }
        Ok(Request::Handshake(Err(e))) => {
            warn!("Handshake from {} failed: {}", user, e);
            Ok(Some(handshake_error(&e)))
        }
        Ok(Request::Spectate) => fanout::handle_spectate(registry, user, now).map(Some),
        Ok(Request::Update(update)) => fanout::handle_update(registry, user, &update, now).map(Some),
        Err(e) => {
            error!(
                "Got malformed input from {}: {} ({})",
                user,
                e,
                String::from_utf8_lossy(message)
            );
            Ok(None)
        }
    }
}
