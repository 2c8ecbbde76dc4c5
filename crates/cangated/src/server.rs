//! TCP listener and connection supervision

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::connection::Connection;
use crate::context::GatewayContext;
use crate::error::GatewayError;

const LISTEN_BACKLOG: i32 = 16;

/// Accepts clients and runs each connection in its own task
pub struct ConnectionManager {
    ctx: Arc<GatewayContext>,
    listener: TcpListener,
}

impl ConnectionManager {
    /// Bind with SO_REUSEADDR so a restarted daemon can take the port at once.
    /// Must be called inside a tokio runtime.
    pub fn bind(ctx: Arc<GatewayContext>, addr: SocketAddr) -> Result<Self, GatewayError> {
        let bind_err = |source| GatewayError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

        let listener = TcpListener::from_std(socket.into()).map_err(bind_err)?;
        Ok(Self { ctx, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until a fatal accept error
    ///
    /// Dropping the returned future aborts every connection task.
    pub async fn run(self) -> Result<(), GatewayError> {
        let mut connections = JoinSet::new();
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn = Connection::new(self.ctx.clone(), stream, peer);
                        connections.spawn(async move {
                            if let Err(e) = conn.run().await {
                                tracing::warn!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::debug!(error = %e, "Accept interrupted");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        return Err(GatewayError::Accept(e));
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cangate_can::{MockScheduler, SysfsCounters};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::registry::BusRegistry;
    use crate::statistics::StatisticsService;

    fn manager(scheduler: &MockScheduler) -> ConnectionManager {
        let (_service, statistics) =
            StatisticsService::new(SysfsCounters::default(), Duration::from_secs(1));
        let ctx = GatewayContext::mock(BusRegistry::new(["vcan0"]), scheduler.clone(), statistics);
        ConnectionManager::bind(Arc::new(ctx), "127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_clients_are_isolated() {
        let scheduler = MockScheduler::new();
        let manager = manager(&scheduler);
        let addr = manager.local_addr().unwrap();
        let server = tokio::spawn(manager.run());

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        let mut hi = [0u8; 4];
        a.read_exact(&mut hi).await.unwrap();
        b.read_exact(&mut hi).await.unwrap();
        assert_eq!(&hi, b"<hi>");

        // A fails its handshake; B must not notice
        a.write_all(b"<open nope>").await.unwrap();
        let mut refused = Vec::new();
        a.read_to_end(&mut refused).await.unwrap();
        assert_eq!(refused, b"<error could not open bus>");

        b.write_all(b"<open vcan0>< vcan0 S 1 0 >").await.unwrap();
        assert!(scheduler.wait_for_dispatches(1, Duration::from_secs(2)).await);
        assert_eq!(scheduler.open_endpoints(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let scheduler = MockScheduler::new();
        let first = manager(&scheduler);
        let addr = first.local_addr().unwrap();

        let (_service, statistics) =
            StatisticsService::new(SysfsCounters::default(), Duration::from_secs(1));
        let ctx = GatewayContext::mock(BusRegistry::default(), scheduler.clone(), statistics);
        let second = ConnectionManager::bind(Arc::new(ctx), addr);
        assert!(matches!(second, Err(GatewayError::Bind { .. })));
    }
}
