//! Integration tests for the cangate gateway
//!
//! The tests run a real [`ConnectionManager`] on an ephemeral TCP port and
//! talk to it over plain sockets, like any client would.
//!
//! # Running Tests
//!
//! `protocol_test.rs` uses the in-process mock scheduler and runs anywhere.
//! `vcan_e2e_test.rs` drives the kernel broadcast manager and needs vcan0:
//!
//! ```bash
//! # Set up vcan0 (requires sudo)
//! sudo modprobe vcan
//! sudo ip link add dev vcan0 type vcan
//! sudo ip link set up vcan0
//!
//! cargo test -p cangate-tests -- --test-threads=1
//! ```

use std::net::SocketAddr;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use cangate_can::{MockScheduler, SysfsCounters};
use cangated::{BusRegistry, ConnectionManager, GatewayContext, GatewayError, StatisticsService};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(3);

/// Check if a network interface exists
pub fn interface_available(name: &str) -> bool {
    Command::new("ip")
        .args(["link", "show", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Skip the calling test if vcan0 is not available
#[macro_export]
macro_rules! require_vcan0 {
    () => {
        if !$crate::interface_available("vcan0") {
            eprintln!("Skipping test: vcan0 interface not available");
            return;
        }
    };
}

/// A gateway listening on 127.0.0.1 with an ephemeral port
pub struct GatewayHarness {
    pub addr: SocketAddr,
    server: JoinHandle<Result<(), GatewayError>>,
    statistics: JoinHandle<()>,
}

impl GatewayHarness {
    /// Serve from an already wired context
    pub fn start(ctx: GatewayContext, statistics: StatisticsService) -> Self {
        let manager = ConnectionManager::bind(Arc::new(ctx), "127.0.0.1:0".parse().unwrap())
            .expect("bind test listener");
        let addr = manager.local_addr().expect("listener address");
        Self {
            addr,
            server: tokio::spawn(manager.run()),
            statistics: tokio::spawn(statistics.run()),
        }
    }

    /// Gateway backed by the mock scheduler
    pub fn mock(buses: &[&str], scheduler: &MockScheduler) -> Self {
        let (statistics, handle) =
            StatisticsService::new(SysfsCounters::new(), Duration::from_millis(100));
        let ctx = GatewayContext::mock(
            BusRegistry::new(buses.iter().copied()),
            scheduler.clone(),
            handle,
        );
        Self::start(ctx, statistics)
    }

    /// Gateway backed by the kernel broadcast manager
    pub fn bcm(buses: &[&str]) -> Self {
        let (statistics, handle) =
            StatisticsService::new(SysfsCounters::new(), Duration::from_millis(100));
        let config = cangated::DaemonConfig::default();
        let ctx = GatewayContext::from_config(
            &config,
            BusRegistry::new(buses.iter().copied()),
            handle,
        )
        .expect("BCM context");
        Self::start(ctx, statistics)
    }

    pub async fn connect(&self) -> TestClient {
        let stream = tokio::time::timeout(WAIT, TcpStream::connect(self.addr))
            .await
            .expect("connect timed out")
            .expect("connect");
        TestClient {
            stream: BufReader::new(stream),
        }
    }
}

impl Drop for GatewayHarness {
    fn drop(&mut self) {
        self.server.abort();
        self.statistics.abort();
    }
}

/// Line-level protocol client
pub struct TestClient {
    stream: BufReader<TcpStream>,
}

impl TestClient {
    pub async fn send(&mut self, text: &str) {
        self.stream
            .get_mut()
            .write_all(text.as_bytes())
            .await
            .expect("send");
    }

    /// Read exactly `expected.len()` bytes and compare
    pub async fn expect(&mut self, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(WAIT, self.stream.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .expect("read");
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    /// Consume the greeting and open `bus`
    pub async fn open(&mut self, bus: &str) {
        self.expect(b"<hi>").await;
        self.send(&format!("<open {bus}>")).await;
    }

    /// Next NUL-terminated bridge message, terminator stripped
    pub async fn message(&mut self) -> String {
        let mut buf = Vec::new();
        tokio::time::timeout(WAIT, self.stream.read_until(0, &mut buf))
            .await
            .expect("read timed out")
            .expect("read");
        assert_eq!(buf.pop(), Some(0), "message not NUL terminated");
        String::from_utf8(buf).expect("ASCII message")
    }

    /// Next message if one arrives within `wait`
    pub async fn try_message(&mut self, wait: Duration) -> Option<String> {
        let mut buf = Vec::new();
        match tokio::time::timeout(wait, self.stream.read_until(0, &mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                buf.pop();
                Some(String::from_utf8_lossy(&buf).into_owned())
            }
            _ => None,
        }
    }

    /// Everything until the server closes the connection
    pub async fn read_to_close(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        tokio::time::timeout(WAIT, self.stream.read_to_end(&mut buf))
            .await
            .expect("server did not close")
            .expect("read");
        buf
    }
}
