use crate::protocol::message::{Message, MessageKind};
use crate::protocol::{is_peer_gone, Protocol};
use anyhow::Context;
use cli::tui::{Renderer, TableRenderer};
use cli::ClientArgs;
use getset::Getters;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Subscription rejected by the server: {0}")]
    Rejected(String),

    #[error("Unexpected message from the server: {0}")]
    UnexpectedMessage(MessageKind),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Subscribes to a monitoring server.
#[derive(Debug, Getters, TypedBuilder)]
#[getset(get = "pub")]
pub struct MonitorClient {
    #[builder(setter(into))]
    server_address: String,
    #[builder(default = common::DEFAULT_INTERVAL)]
    interval: u32,
    #[builder(default = common::DEFAULT_COUNTER)]
    counter: u32,
}

impl MonitorClient {
    /// Open the connection and send the subscription.
    pub async fn connect(&self) -> Result<MetricStream, ClientError> {
        let stream = TcpStream::connect(&self.server_address)
            .await
            .map_err(|source| ClientError::Connect {
                address: self.server_address.clone(),
                source,
            })?;
        debug!(address = %self.server_address, "Connected");

        let (reader, writer) = stream.into_split();
        let mut stream = MetricStream::new(reader, writer);
        stream.subscribe(self.interval, self.counter).await?;
        Ok(stream)
    }
}

/// The subscriber side of an established connection.
pub struct MetricStream<R = OwnedReadHalf, W = OwnedWriteHalf> {
    reader: R,
    writer: W,
}

impl<R, W> MetricStream<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub async fn subscribe(&mut self, interval: u32, counter: u32) -> Result<(), ClientError> {
        info!(interval, counter, "Subscribing");
        Protocol::send_message(&mut self.writer, &Message::subscribe(interval, counter)).await?;
        Ok(())
    }

    /// Hand every snapshot to `renderer` until the server closes the connection or
    /// `cancel` fires. Returns the number of snapshots received.
    ///
    /// Cancelling sends a termination frame first. A server that goes away cancels
    /// `cancel` so that other tasks tied to it stop as well.
    pub async fn receive<T: Renderer>(
        &mut self,
        renderer: &mut T,
        cancel: &CancellationToken,
    ) -> Result<usize, ClientError> {
        let mut received = 0;

        loop {
            let incoming = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.terminate().await;
                    return Ok(received);
                }
                incoming = Protocol::parse_incoming(&mut self.reader) => incoming,
            };

            match incoming {
                Ok(Some(Message::MetricsMessage { metric })) => {
                    received += 1;
                    if let Err(err) = renderer.render(&metric) {
                        warn!(kind = %metric.kind(), error = %err, "Unable to render snapshot");
                    }
                }
                Ok(Some(Message::ErrorResponse { error })) => {
                    cancel.cancel();
                    return Err(ClientError::Rejected(error));
                }
                Ok(Some(other)) => {
                    cancel.cancel();
                    return Err(ClientError::UnexpectedMessage(other.kind()));
                }
                Ok(None) => {
                    info!("Server closed the connection");
                    cancel.cancel();
                    return Ok(received);
                }
                Err(err) if is_peer_gone(&err) => {
                    info!(error = %err, "Server went away");
                    cancel.cancel();
                    return Ok(received);
                }
                Err(err) => {
                    cancel.cancel();
                    return Err(err.into());
                }
            }
        }
    }

    async fn terminate(&mut self) {
        match Protocol::send_message(&mut self.writer, &Message::TerminationMessage).await {
            Ok(()) => debug!("Termination sent"),
            Err(err) => debug!(error = %err, "Unable to send termination"),
        }
    }
}

/// Subscribe with the command-line settings and draw tables until Ctrl-C.
pub async fn start_client(args: &ClientArgs) -> anyhow::Result<()> {
    let client = MonitorClient::builder()
        .server_address(args.address())
        .interval(*args.interval())
        .counter(*args.counter())
        .build();

    let mut stream = client.connect().await.context("Unable to start client")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = on_signal.cancelled() => {}
            result = signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Interrupted, unsubscribing...");
                    on_signal.cancel();
                }
                Err(err) => warn!(error = %err, "Unable to listen for Ctrl-C"),
            },
        }
    });

    let mut renderer = TableRenderer::new();
    let received = stream.receive(&mut renderer, &cancel).await?;
    info!(received, "Client stopped");
    Ok(())
}

#[cfg(test)]
mod client_tests {
    use super::*;
    use anyhow::Result;
    use metrics::metric::{CpuSample, DiskSample, IoSample, LoadSample};
    use metrics::Metric;
    use tokio::io::{duplex, split};

    #[derive(Default)]
    struct Recording {
        loads: Vec<LoadSample>,
        fail: bool,
    }

    impl Renderer for Recording {
        fn draw_cpu(&mut self, _sample: &CpuSample) -> Result<()> {
            Ok(())
        }

        fn draw_load(&mut self, sample: &LoadSample) -> Result<()> {
            if self.fail {
                anyhow::bail!("terminal is gone");
            }
            self.loads.push(*sample);
            Ok(())
        }

        fn draw_io(&mut self, _sample: &IoSample) -> Result<()> {
            Ok(())
        }

        fn draw_disk_usage(&mut self, _sample: &DiskSample) -> Result<()> {
            Ok(())
        }

        fn draw_disk_inode(&mut self, _sample: &DiskSample) -> Result<()> {
            Ok(())
        }
    }

    fn load(load1: f32) -> Message {
        Message::metrics(Metric::Load(LoadSample {
            load1,
            load5: 0.0,
            load15: 0.0,
        }))
    }

    #[tokio::test]
    async fn renders_until_server_closes() {
        let (local, remote) = duplex(4096);
        let (reader, writer) = split(local);
        let (mut server_reader, mut server_writer) = split(remote);
        let mut stream = MetricStream::new(reader, writer);

        stream.subscribe(2, 4).await.unwrap();
        assert_eq!(
            Protocol::parse_incoming(&mut server_reader).await.unwrap(),
            Some(Message::subscribe(2, 4))
        );

        Protocol::send_message(&mut server_writer, &load(1.5)).await.unwrap();
        Protocol::send_message(&mut server_writer, &load(2.5)).await.unwrap();
        drop(server_writer);
        drop(server_reader);

        let cancel = CancellationToken::new();
        let mut renderer = Recording::default();
        let received = stream.receive(&mut renderer, &cancel).await.unwrap();

        assert_eq!(received, 2);
        assert_eq!(renderer.loads.len(), 2);
        assert_eq!(renderer.loads[1].load1, 2.5);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_sends_termination() {
        let (local, remote) = duplex(4096);
        let (reader, writer) = split(local);
        let (mut server_reader, _server_writer) = split(remote);
        let mut stream = MetricStream::new(reader, writer);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let received = stream
            .receive(&mut Recording::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(received, 0);
        assert_eq!(
            Protocol::parse_incoming(&mut server_reader).await.unwrap(),
            Some(Message::TerminationMessage)
        );
    }

    #[tokio::test]
    async fn error_response_is_a_rejection() {
        let (local, remote) = duplex(4096);
        let (reader, writer) = split(local);
        let (_server_reader, mut server_writer) = split(remote);
        let mut stream = MetricStream::new(reader, writer);

        Protocol::send_message(
            &mut server_writer,
            &Message::error_response("counter must be at least 1"),
        )
        .await
        .unwrap();

        let err = stream
            .receive(&mut Recording::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(reason) if reason.contains("counter")));
    }

    #[tokio::test]
    async fn render_failures_do_not_stop_the_stream() {
        let (local, remote) = duplex(4096);
        let (reader, writer) = split(local);
        let (server_reader, mut server_writer) = split(remote);
        let mut stream = MetricStream::new(reader, writer);

        Protocol::send_message(&mut server_writer, &load(1.0)).await.unwrap();
        Protocol::send_message(&mut server_writer, &load(2.0)).await.unwrap();
        drop(server_writer);
        drop(server_reader);

        let mut renderer = Recording {
            fail: true,
            ..Default::default()
        };
        let received = stream
            .receive(&mut renderer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(received, 2);
        assert!(renderer.loads.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = MonitorClient::builder().server_address(address).build();
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Connect { .. })
        ));
    }
}
