use anyhow::Result;
use async_trait::async_trait;
use core::fmt;
use getset::Getters;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

pub mod trace;

/// Hooks around the lifetime of a subscriber connection.
///
/// Middleware runs in the order it was added to the [`MiddlewareStack`]. An error from
/// `on_connect` refuses the connection before a session is created; errors from
/// `on_disconnect` are only logged since the connection is already gone.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Identifies the middleware in logs.
    fn name(&self) -> String;

    /// Called once a connection has been accepted.
    async fn on_connect(&self, peer: &SocketAddr) -> Result<()>;

    /// Called after the connection's session has been torn down, with the time the
    /// connection was open.
    async fn on_disconnect(&self, peer: &SocketAddr, lifespan: Duration) -> Result<()>;
}

/// A reference-counted reference to a [`MiddlewareStack`].
pub type MiddlewareStackRef = Arc<MiddlewareStack>;

#[derive(Default, Getters)]
#[getset(get = "pub")]
pub struct MiddlewareStack {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        let start = Instant::now();
        let name = middleware.name();
        self.middlewares.push(Box::new(middleware));
        trace!(
            "Added middleware {} to middleware stack in {:?}",
            name,
            start.elapsed()
        );
    }

    pub async fn handle_connect(&self, peer: &SocketAddr) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_connect(peer).await?;
        }
        Ok(())
    }

    pub async fn handle_disconnect(&self, peer: &SocketAddr, lifespan: Duration) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_disconnect(peer, lifespan).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareStack")
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}
