use async_trait::async_trait;
use cli::tui::Renderer;
use common::MetricsConfig;
use metrics::collector::{BoxedCollector, CollectError};
use metrics::metric::{CpuSample, CpuStat, DiskSample, DiskStat, IoSample, IoStat, LoadSample};
use metrics::{CollectorFactory, Metric, MetricCollector, MetricKind};
use network::client::{ClientError, MonitorClient};
use network::middleware::MiddlewareStack;
use network::protocol::message::Message;
use network::protocol::Protocol;
use network::server::MonitorServer;
use network::session::SessionDispatcher;
use pretty_assertions_sorted::assert_eq;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(20);
const PATIENCE: Duration = Duration::from_secs(5);

/// Yields 1, 2, 3, ... wrapped into the sample type of one kind.
struct Counting<S> {
    next: f32,
    kind: MetricKind,
    sample: fn(f32) -> S,
    wrap: fn(S) -> Metric,
}

#[async_trait]
impl<S> MetricCollector for Counting<S>
where
    S: metrics::aggregate::Aggregate + Send + Sync + 'static,
{
    type Sample = S;

    fn name(&self) -> &'static str {
        "counting"
    }

    fn kind(&self) -> MetricKind {
        self.kind
    }

    async fn collect(&mut self) -> Result<S, CollectError> {
        self.next += 1.0;
        Ok((self.sample)(self.next))
    }

    fn snapshot(&self, average: S) -> Metric {
        (self.wrap)(average)
    }
}

fn counting<S>(kind: MetricKind, sample: fn(f32) -> S, wrap: fn(S) -> Metric) -> BoxedCollector<S>
where
    S: metrics::aggregate::Aggregate + Send + Sync + 'static,
{
    Box::new(Counting {
        next: 0.0,
        kind,
        sample,
        wrap,
    })
}

fn disk(n: f32) -> DiskSample {
    DiskSample {
        mounts: vec![DiskStat {
            device: "/dev/sda1".to_string(),
            fs_type: "ext4".to_string(),
            mount: "/".to_string(),
            used: n as i64,
            available: 100,
        }],
    }
}

struct Scripted;

impl CollectorFactory for Scripted {
    fn cpu(&self) -> BoxedCollector<CpuSample> {
        counting(
            MetricKind::Cpu,
            |n| CpuSample {
                cpus: vec![CpuStat {
                    cpu: "all".to_string(),
                    user: n,
                    system: 0.0,
                    idle: 100.0 - n,
                }],
            },
            Metric::Cpu,
        )
    }

    fn load(&self) -> BoxedCollector<LoadSample> {
        counting(
            MetricKind::Load,
            |n| LoadSample {
                load1: n,
                load5: n,
                load15: n,
            },
            Metric::Load,
        )
    }

    fn io(&self) -> BoxedCollector<IoSample> {
        counting(
            MetricKind::Io,
            |n| IoSample {
                disks: vec![IoStat {
                    device: "sda".to_string(),
                    read_kbs: n,
                    write_kbs: n,
                    util: 0.0,
                }],
            },
            Metric::Io,
        )
    }

    fn disk_usage(&self) -> BoxedCollector<DiskSample> {
        counting(MetricKind::DiskUsage, disk, Metric::DiskUsage)
    }

    fn disk_inode(&self) -> BoxedCollector<DiskSample> {
        counting(MetricKind::DiskInode, disk, Metric::DiskInode)
    }
}

struct Running {
    address: SocketAddr,
    server: Arc<MonitorServer>,
    handle: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.server.shutdown_token().cancel();
        timeout(PATIENCE, self.handle).await.unwrap().unwrap();
    }
}

async fn start(metrics: MetricsConfig) -> Running {
    let dispatcher = SessionDispatcher::builder()
        .metrics(metrics)
        .factory(Arc::new(Scripted))
        .tick(TICK)
        .build();
    let server = Arc::new(
        MonitorServer::builder()
            .address("127.0.0.1:0")
            .dispatcher(Arc::new(dispatcher))
            .middleware_stack(Arc::new(MiddlewareStack::new()))
            .build(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    Running {
        address,
        server,
        handle,
    }
}

async fn subscribe(address: SocketAddr, interval: u32, counter: u32) -> TcpStream {
    let mut stream = TcpStream::connect(address).await.unwrap();
    Protocol::send_message(&mut stream, &Message::subscribe(interval, counter))
        .await
        .unwrap();
    stream
}

async fn next_metric(stream: &mut TcpStream) -> Metric {
    match timeout(PATIENCE, Protocol::parse_incoming(stream))
        .await
        .unwrap()
        .unwrap()
    {
        Some(Message::MetricsMessage { metric }) => metric,
        other => panic!("expected a snapshot, got {:?}", other),
    }
}

fn load1(metric: Metric) -> f32 {
    match metric {
        Metric::Load(sample) => sample.load1,
        other => panic!("expected a load snapshot, got {:?}", other),
    }
}

fn load_only() -> MetricsConfig {
    MetricsConfig::builder()
        .cpu(false)
        .io(false)
        .disk_usage(false)
        .disk_inode(false)
        .build()
}

#[tokio::test]
async fn every_enabled_kind_is_streamed() {
    let running = start(MetricsConfig::default()).await;
    let mut stream = subscribe(running.address, 1, 1).await;

    let mut seen = BTreeSet::new();
    while seen.len() < MetricKind::ALL.len() {
        seen.insert(next_metric(&mut stream).await.kind());
    }
    assert_eq!(seen, MetricKind::ALL.into_iter().collect::<BTreeSet<_>>());

    drop(stream);
    running.stop().await;
}

#[tokio::test]
async fn disabled_kinds_are_never_sent() {
    let running = start(load_only()).await;
    let mut stream = subscribe(running.address, 1, 1).await;

    let values = vec![
        load1(next_metric(&mut stream).await),
        load1(next_metric(&mut stream).await),
        load1(next_metric(&mut stream).await),
    ];
    assert_eq!(values, vec![1.0, 2.0, 3.0]);

    drop(stream);
    running.stop().await;
}

#[tokio::test]
async fn no_enabled_kind_keeps_the_connection_quiet() {
    let running = start(MetricsConfig::none()).await;
    let mut stream = subscribe(running.address, 1, 1).await;

    assert!(
        timeout(TICK * 10, Protocol::parse_incoming(&mut stream))
            .await
            .is_err()
    );

    Protocol::send_message(&mut stream, &Message::TerminationMessage)
        .await
        .unwrap();
    let closed = timeout(PATIENCE, Protocol::parse_incoming(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, None);

    running.stop().await;
}

#[tokio::test]
async fn sessions_are_independent() {
    let running = start(load_only()).await;
    let mut every_tick = subscribe(running.address, 1, 1).await;
    let mut every_other = subscribe(running.address, 2, 2).await;

    assert_eq!(load1(next_metric(&mut every_other).await), 1.5);
    assert_eq!(load1(next_metric(&mut every_other).await), 3.5);
    assert_eq!(load1(next_metric(&mut every_tick).await), 1.0);

    Protocol::send_message(&mut every_tick, &Message::TerminationMessage)
        .await
        .unwrap();
    loop {
        match timeout(PATIENCE, Protocol::parse_incoming(&mut every_tick))
            .await
            .unwrap()
        {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }

    assert_eq!(load1(next_metric(&mut every_other).await), 5.5);

    drop(every_other);
    running.stop().await;
}

#[tokio::test]
async fn zero_counter_is_rejected() {
    let running = start(MetricsConfig::default()).await;
    let mut stream = subscribe(running.address, 1, 0).await;

    let reply = timeout(PATIENCE, Protocol::parse_incoming(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        reply,
        Some(Message::ErrorResponse { ref error }) if error.contains("counter")
    ));

    let closed = timeout(PATIENCE, Protocol::parse_incoming(&mut stream))
        .await
        .unwrap();
    assert!(matches!(closed, Ok(None) | Err(_)));

    running.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let running = start(load_only()).await;
    let mut stream = subscribe(running.address, 1, 1).await;
    next_metric(&mut stream).await;

    let server = running.server.clone();
    running.stop().await;
    assert_eq!(server.active_sessions(), 0);

    loop {
        match timeout(PATIENCE, Protocol::parse_incoming(&mut stream))
            .await
            .unwrap()
        {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
}

/// Records load snapshots and unsubscribes after `limit` of them.
struct Stopping {
    loads: Vec<f32>,
    limit: usize,
    cancel: CancellationToken,
}

impl Renderer for Stopping {
    fn draw_cpu(&mut self, _sample: &CpuSample) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_load(&mut self, sample: &LoadSample) -> anyhow::Result<()> {
        self.loads.push(sample.load1);
        if self.loads.len() == self.limit {
            self.cancel.cancel();
        }
        Ok(())
    }

    fn draw_io(&mut self, _sample: &IoSample) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_disk_usage(&mut self, _sample: &DiskSample) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_disk_inode(&mut self, _sample: &DiskSample) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn client_receives_and_unsubscribes() {
    let running = start(load_only()).await;
    let client = MonitorClient::builder()
        .server_address(running.address.to_string())
        .interval(1)
        .counter(2)
        .build();

    let mut stream = client.connect().await.unwrap();
    let cancel = CancellationToken::new();
    let mut renderer = Stopping {
        loads: Vec::new(),
        limit: 3,
        cancel: cancel.clone(),
    };

    let received = timeout(PATIENCE, stream.receive(&mut renderer, &cancel))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received, 3);
    assert_eq!(renderer.loads, vec![1.0, 1.5, 2.5]);
    running.stop().await;
}

#[tokio::test]
async fn client_sees_rejection() {
    let running = start(MetricsConfig::default()).await;
    let client = MonitorClient::builder()
        .server_address(running.address.to_string())
        .interval(1)
        .counter(0)
        .build();

    let mut stream = client.connect().await.unwrap();
    let mut renderer = Stopping {
        loads: Vec::new(),
        limit: 1,
        cancel: CancellationToken::new(),
    };
    let err = timeout(
        PATIENCE,
        stream.receive(&mut renderer, &CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, ClientError::Rejected(_)));
    running.stop().await;
}
