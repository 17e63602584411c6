use crate::middleware::trace::LoggingMiddleware;
use crate::middleware::{MiddlewareStack, MiddlewareStackRef};
use crate::protocol::handler::ConnectionHandler;
use crate::protocol::message::Message;
use crate::protocol::Protocol;
use crate::session::SessionDispatcher;
use common::util::time::{elapsed_duration_since, now_as_u64};
use common::ServerConfig;
use core::fmt;
use dashmap::DashMap;
use metrics::CollectorFactory;
use rustc_hash::FxHasher;
use shrinkwraprs::Shrinkwrap;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

/// Upper bound of concurrently served subscribers.
pub const DEFAULT_MAX_CONNECTIONS: usize = 128;

/// Unique identifier for each connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Shrinkwrap)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A reference-counted [`Semaphore`] handle that can be shared across threads.
pub type SemaphoreRef = Arc<Semaphore>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection pool is full. Max connections: {0}")]
    ConnectionPoolFull(usize),
}

/// Accepts subscribers and runs one session per connection.
///
/// Every session's cancellation token is a child of the server's shutdown token, so
/// cancelling the latter stops all of them; the server then waits for each session to
/// finish before returning.
#[derive(Debug, TypedBuilder)]
pub struct MonitorServer {
    #[builder(setter(into))]
    address: String,
    dispatcher: Arc<SessionDispatcher>,
    middleware_stack: MiddlewareStackRef,
    #[builder(default = Arc::new(DashMap::new()))]
    sessions: Arc<DashMap<ConnectionId, SocketAddr>>,
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,
    #[builder(default = Arc::new(Semaphore::new(max_connections)))]
    conn_pool: SemaphoreRef,
    #[builder(default)]
    shutdown: CancellationToken,
}

impl MonitorServer {
    pub fn new(config: &ServerConfig, factory: Arc<dyn CollectorFactory>) -> Self {
        let mut middleware_stack = MiddlewareStack::new();
        middleware_stack.add_middleware(LoggingMiddleware::new());

        MonitorServer::builder()
            .address(config.listen().address())
            .dispatcher(Arc::new(SessionDispatcher::new(*config.metrics(), factory)))
            .middleware_stack(Arc::new(middleware_stack))
            .build()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.address)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.address.clone(),
                source,
            })
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections until the shutdown token fires, then join every session.
    pub async fn serve(&self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(address) => info!("Server successfully running on {}", address),
            Err(_) => info!("Server successfully running on {}", self.address),
        }

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "Connection task failed");
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => self.accept(&mut connections, socket, peer).await,
                    Err(err) => warn!(error = %err, "Failed to accept connection"),
                },
            }
        }

        debug!(sessions = connections.len(), "Waiting for sessions to finish");
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Connection task failed");
            }
        }
        info!("Server stopped");
    }

    async fn accept(&self, connections: &mut JoinSet<()>, mut socket: TcpStream, peer: SocketAddr) {
        let permit = match self.conn_pool.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let err = ServerError::ConnectionPoolFull(self.max_connections);
                warn!(%peer, "{}", err);
                let reply = Message::error_response(err.to_string());
                if let Err(err) = Protocol::send_message(&mut socket, &reply).await {
                    debug!(%peer, error = %err, "Failed to notify refused connection");
                }
                return;
            }
        };

        let conn_id = generate_connection_id(&peer);
        self.sessions.insert(conn_id, peer);
        debug!(%conn_id, active = self.sessions.len(), "Currently active connections");

        let handler = ConnectionHandler::builder()
            .stream(socket)
            .peer(peer)
            .dispatcher(self.dispatcher.clone())
            .cancel(self.shutdown.child_token())
            .build();
        let middleware = self.middleware_stack.clone();
        let sessions = self.sessions.clone();

        connections.spawn(async move {
            let started = now_as_u64();

            match middleware.handle_connect(&peer).await {
                Ok(()) => {
                    if let Err(err) = handler.handle_connection().await {
                        warn!(%peer, error = %err, "Session ended with an error");
                    }
                }
                Err(err) => warn!(%peer, error = %err, "Connection refused by middleware"),
            }

            if let Err(err) = middleware
                .handle_disconnect(&peer, elapsed_duration_since(started))
                .await
            {
                debug!(%peer, error = %err, "Disconnect hook failed");
            }

            sessions.remove(&conn_id);
            drop(permit);
        });
    }
}

pub fn generate_connection_id(addr: &SocketAddr) -> ConnectionId {
    let mut hasher = FxHasher::default();
    addr.hash(&mut hasher);
    ConnectionId(hasher.finish())
}
