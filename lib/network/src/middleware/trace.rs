use super::Middleware;
use async_trait::async_trait;
use common::util::time::format_duration;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

/// Logs subscriber connects and disconnects, with the number of open connections.
#[derive(Debug, Default)]
pub struct LoggingMiddleware {
    open: AtomicUsize,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    #[inline]
    fn name(&self) -> String {
        "LoggingMiddleware".to_string()
    }

    #[inline]
    async fn on_connect(&self, peer: &SocketAddr) -> anyhow::Result<()> {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        info!(open, "Connection established with {}", peer);
        Ok(())
    }

    #[inline]
    async fn on_disconnect(&self, peer: &SocketAddr, lifespan: Duration) -> anyhow::Result<()> {
        let open = self.open.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        info!(
            open,
            "Connection terminated with {} (lifespan: {})",
            peer,
            format_duration(lifespan)
        );
        Ok(())
    }
}
