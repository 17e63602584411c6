use super::message::Message;
use super::Protocol;
use crate::session::{SessionDispatcher, SessionError};
use metrics::engine::WindowSettings;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use typed_builder::TypedBuilder;

/// Serves one accepted connection: negotiates the subscription, then streams
/// snapshots until the subscriber leaves or `cancel` fires.
#[derive(Debug, TypedBuilder)]
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<SessionDispatcher>,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    #[instrument(skip(self), fields(peer = %self.peer))]
    pub async fn handle_connection(self) -> Result<(), SessionError> {
        let ConnectionHandler {
            stream,
            dispatcher,
            cancel,
            ..
        } = self;

        let (reader, writer) = stream.into_split();
        run_session(reader, writer, &dispatcher, cancel).await
    }
}

/// Session lifecycle over any split byte stream.
pub async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    dispatcher: &SessionDispatcher,
    cancel: CancellationToken,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Some(settings) = negotiate(&mut reader, &mut writer, dispatcher, &cancel).await? else {
        return Ok(());
    };

    info!(
        interval = settings.interval(),
        counter = settings.counter(),
        kinds = ?dispatcher.enabled_kinds(),
        "Subscription accepted"
    );

    // The write half stays open until both halves finish, even with no enabled kinds.
    let writer = Arc::new(Mutex::new(writer));
    tokio::join!(
        dispatcher.dispatch(settings, writer.clone(), cancel.clone()),
        watch_inbound(reader, cancel.clone()),
    );
    drop(writer);

    debug!("Session closed");
    Ok(())
}

/// Read the first frame. Anything but a well-formed subscription is answered with an
/// error frame and ends the connection.
async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    dispatcher: &SessionDispatcher,
    cancel: &CancellationToken,
) -> Result<Option<WindowSettings>, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        frame = Protocol::parse_incoming(reader) => frame,
    };

    let reason = match first {
        Ok(Some(Message::SubscribeMessage { counter: 0, .. })) => {
            "counter must be at least 1".to_string()
        }
        Ok(Some(Message::SubscribeMessage { interval, counter })) => {
            return Ok(Some(dispatcher.settings(interval, counter)));
        }
        Ok(Some(other)) => format!("expected SubscribeMessage, got {}", other.kind()),
        Ok(None) => {
            debug!("Connection closed before subscribing");
            return Ok(None);
        }
        Err(err) if err.kind() == ErrorKind::InvalidData => format!("malformed frame: {}", err),
        Err(err) => return Err(err.into()),
    };

    warn!(%reason, "Rejecting subscription");
    Protocol::send_message(writer, &Message::error_response(reason.clone())).await?;
    Err(SessionError::Malformed(reason))
}

/// Watch the inbound half. End of stream, a termination request or a read error
/// cancels the session.
async fn watch_inbound<R>(mut reader: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            frame = Protocol::parse_incoming(&mut reader) => frame,
        };

        match frame {
            Ok(Some(Message::TerminationMessage)) => {
                debug!("Subscriber requested termination");
                break;
            }
            Ok(Some(other)) => debug!(message = %other, "Ignoring message on an active session"),
            Ok(None) => {
                debug!("Subscriber disconnected");
                break;
            }
            Err(err) => {
                warn!(error = %err, "Failed to read from subscriber");
                break;
            }
        }
    }

    cancel.cancel();
}
