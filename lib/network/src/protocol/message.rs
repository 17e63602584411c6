use bytes::{Buf, BufMut, BytesMut};
use common::traits::encode::{Decodable, Encodable, EncodingError};
use core::fmt;
use metrics::Metric;
use std::io;
use thiserror::Error;

/// Message types
///
/// | Type |        Name            | Direction       |              Payload                 |
/// | -    | ---------------------- | --------------- | ------------------------------------ |
/// | 1    | SubscribeMessage       | client → server | `interval`, `counter` (BE u32 each)  |
/// | 2    | MetricsMessage         | server → client | JSON encoded metric snapshot         |
/// | 3    | ErrorResponse          | server → client | UTF-8 error text                     |
/// | 4    | TerminationMessage     | client → server | empty                                |
///
/// Every frame starts with a 1 byte type and a 4 byte big-endian length that
/// includes the header itself.

pub const TYPE_SUBSCRIBE: u8 = 0x01;
pub const TYPE_METRICS: u8 = 0x02;
pub const TYPE_ERROR_RESPONSE: u8 = 0x03;
pub const TYPE_TERMINATION: u8 = 0x04;

/// 1 byte for the type + 4 bytes for the length field.
pub const HEADER_LENGTH: usize = 5;

/// Upper bound of a frame, header included.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid frame length {0}")]
    InvalidLength(usize),

    #[error("Unknown message type 0x{0:02x}")]
    UnknownKind(u8),

    #[error("Malformed {kind} payload: {reason}")]
    Malformed { kind: MessageKind, reason: String },

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    SubscribeMessage,
    MetricsMessage,
    ErrorResponse,
    TerminationMessage,
}

impl MessageKind {
    pub fn to_u8(self) -> u8 {
        match self {
            MessageKind::SubscribeMessage => TYPE_SUBSCRIBE,
            MessageKind::MetricsMessage => TYPE_METRICS,
            MessageKind::ErrorResponse => TYPE_ERROR_RESPONSE,
            MessageKind::TerminationMessage => TYPE_TERMINATION,
        }
    }

    pub fn from_u8(kind: u8) -> Result<Self, ProtocolError> {
        match kind {
            TYPE_SUBSCRIBE => Ok(MessageKind::SubscribeMessage),
            TYPE_METRICS => Ok(MessageKind::MetricsMessage),
            TYPE_ERROR_RESPONSE => Ok(MessageKind::ErrorResponse),
            TYPE_TERMINATION => Ok(MessageKind::TerminationMessage),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::SubscribeMessage => "SubscribeMessage",
            MessageKind::MetricsMessage => "MetricsMessage",
            MessageKind::ErrorResponse => "ErrorResponse",
            MessageKind::TerminationMessage => "TerminationMessage",
        };
        write!(f, "[{}]", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SubscribeMessage { interval: u32, counter: u32 },
    MetricsMessage { metric: Metric },
    ErrorResponse { error: String },
    TerminationMessage,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::SubscribeMessage { interval, counter } => write!(
                f,
                "SubscribeMessage {{ interval: {}, counter: {} }}",
                interval, counter
            ),
            Message::MetricsMessage { metric } => {
                write!(f, "MetricsMessage {{ kind: {} }}", metric.kind())
            }
            Message::ErrorResponse { error } => write!(f, "ErrorResponse {{ error: {} }}", error),
            Message::TerminationMessage => write!(f, "TerminationMessage"),
        }
    }
}

impl Message {
    pub fn subscribe(interval: u32, counter: u32) -> Self {
        Message::SubscribeMessage { interval, counter }
    }

    pub fn metrics(metric: Metric) -> Self {
        Message::MetricsMessage { metric }
    }

    pub fn error_response(error: impl Into<String>) -> Self {
        Message::ErrorResponse {
            error: error.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::SubscribeMessage { .. } => MessageKind::SubscribeMessage,
            Message::MetricsMessage { .. } => MessageKind::MetricsMessage,
            Message::ErrorResponse { .. } => MessageKind::ErrorResponse,
            Message::TerminationMessage => MessageKind::TerminationMessage,
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Message::SubscribeMessage { interval, counter } => {
                let mut payload = Vec::with_capacity(8);
                payload.put_u32(*interval);
                payload.put_u32(*counter);
                Ok(payload)
            }
            Message::MetricsMessage { metric } => Ok(metric.encode()?),
            Message::ErrorResponse { error } => Ok(error.as_bytes().to_vec()),
            Message::TerminationMessage => Ok(Vec::new()),
        }
    }

    pub fn from_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, ProtocolError> {
        match kind {
            MessageKind::SubscribeMessage => {
                if payload.len() != 8 {
                    return Err(ProtocolError::Malformed {
                        kind,
                        reason: format!("expected 8 bytes, got {}", payload.len()),
                    });
                }
                let mut buf = payload;
                let interval = buf.get_u32();
                let counter = buf.get_u32();
                Ok(Message::subscribe(interval, counter))
            }
            MessageKind::MetricsMessage => Ok(Message::metrics(Metric::decode(payload)?)),
            MessageKind::ErrorResponse => {
                Ok(Message::error_response(String::from_utf8_lossy(payload)))
            }
            MessageKind::TerminationMessage => Ok(Message::TerminationMessage),
        }
    }

    /// Serialize header and payload into one frame.
    pub fn to_frame(&self) -> Result<BytesMut, ProtocolError> {
        let payload = self.payload()?;
        let length = payload.len() + HEADER_LENGTH;
        if length > MAX_FRAME_LENGTH {
            return Err(ProtocolError::InvalidLength(length));
        }

        let mut buffer = BytesMut::with_capacity(length);
        buffer.put_u8(self.kind().to_u8());
        buffer.put_u32(length as u32);
        buffer.extend_from_slice(&payload);
        Ok(buffer)
    }
}
