use self::message::{Message, MessageKind, ProtocolError, HEADER_LENGTH, MAX_FRAME_LENGTH};
use std::io::{ErrorKind, Result as IoResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, trace};

pub mod handler;
pub mod message;

pub struct Protocol;

impl Protocol {
    /// Read one frame.
    ///
    /// A clean close before the first header byte is `Ok(None)`. A close in the middle
    /// of a frame, an out-of-range length or an unknown type is an error.
    pub async fn parse_incoming<R: AsyncReadExt + Unpin>(
        stream: &mut R,
    ) -> IoResult<Option<Message>> {
        let mut header = [0_u8; HEADER_LENGTH];
        let first = stream.read(&mut header[..1]).await?;
        if first == 0 {
            return Ok(None);
        }
        stream.read_exact(&mut header[1..]).await?;

        let kind = MessageKind::from_u8(header[0])?;
        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        trace!(
            "Received message: `{}` ({} bytes including header)",
            kind,
            length
        );

        if !(HEADER_LENGTH..=MAX_FRAME_LENGTH).contains(&length) {
            error!("Invalid message length: {}. Closing connection.", length);
            return Err(ProtocolError::InvalidLength(length).into());
        }

        let mut payload = vec![0; length - HEADER_LENGTH];
        stream.read_exact(&mut payload).await?;

        Ok(Some(Message::from_payload(kind, &payload)?))
    }

    /// Serialize and write one frame.
    pub async fn send_message<W: AsyncWriteExt + Unpin>(
        stream: &mut W,
        message: &Message,
    ) -> IoResult<()> {
        let frame = message.to_frame()?;
        trace!(
            "Sending message: {} ({} bytes) over the wire.",
            message.kind(),
            frame.len()
        );

        stream.write_all(&frame).await?;
        stream.flush().await
    }
}

/// Errors meaning the other side is gone rather than misbehaving.
pub fn is_peer_gone(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionAborted
    )
}
