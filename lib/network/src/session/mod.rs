//! One subscriber's session: negotiated window shape, the engine and forwarder
//! tasks serving it, and the cancellation scope they share.

use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub mod dispatcher;

pub use dispatcher::SessionDispatcher;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Malformed subscription: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Write half of a connection shared by every forwarder of a session. Frames are
/// written whole under the lock.
pub type SharedWriter<W> = Arc<Mutex<W>>;
