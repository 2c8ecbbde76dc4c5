//! Per-connection protocol state machine
//!
//! ```text
//!   accept ──► NoBus ──<open BUS>──► Bridge ──► Shutdown
//!               │  send <hi>          │  open BCM endpoint
//!               │                     │  loop: client bytes ─► parser ─► translator
//!               │                     │        BCM delivery ─► encoder ─► client
//!               └─ unknown bus ───────┴──────────────────────► Shutdown
//! ```
//!
//! Client bytes are fed to the frame assembler one at a time, so a single
//! read may complete the open handshake and carry bridge commands after it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use cangate_can::{BcmDelivery, BcmError, SchedulingEndpoint};
use cangate_proto::{encode_frame, parse_frame, Command, FrameAssembler, GREETING, OPEN_ERROR};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::context::GatewayContext;
use crate::error::GatewayError;
use crate::translator::BcmJobTranslator;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Greeted, waiting for `<open BUS>`
    NoBus,
    /// Bus open, commands and traffic flowing
    Bridge,
    /// Statistics-only mode; reserved, never entered
    Raw,
    Shutdown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NoBus => "no-bus",
            ConnectionState::Bridge => "bridge",
            ConnectionState::Raw => "raw",
            ConnectionState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

pub struct Connection<S> {
    ctx: Arc<GatewayContext>,
    peer: String,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    state: ConnectionState,
    bus: Option<String>,
    assembler: FrameAssembler,
    /// Bytes read from the client but not yet fed to the assembler
    input: VecDeque<u8>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(ctx: Arc<GatewayContext>, stream: S, peer: impl fmt::Display) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let assembler = FrameAssembler::new(ctx.max_frame_len);
        Self {
            ctx,
            peer: peer.to_string(),
            reader,
            writer,
            state: ConnectionState::NoBus,
            bus: None,
            assembler,
            input: VecDeque::new(),
        }
    }

    /// Drive the connection to completion
    ///
    /// Protocol problems are handled inside; an error means the client
    /// transport failed.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        tracing::info!(peer = %self.peer, "Client connected");

        let result = self.drive().await;
        let _ = self.writer.shutdown().await;

        tracing::info!(peer = %self.peer, bus = ?self.bus, "Client disconnected");
        result
    }

    async fn drive(&mut self) -> Result<(), GatewayError> {
        loop {
            tracing::debug!(peer = %self.peer, state = %self.state, "Entering state");
            self.state = match self.state {
                ConnectionState::NoBus => self.no_bus().await?,
                ConnectionState::Bridge => self.bridge().await?,
                ConnectionState::Raw => {
                    tracing::warn!(peer = %self.peer, "Raw mode not supported, closing");
                    ConnectionState::Shutdown
                }
                ConnectionState::Shutdown => return Ok(()),
            };
        }
    }

    /// Read more client bytes into `input`; `false` on end of stream
    async fn fill(&mut self, chunk: &mut [u8]) -> Result<bool, GatewayError> {
        let n = self.reader.read(chunk).await?;
        self.input.extend(&chunk[..n]);
        Ok(n > 0)
    }

    async fn no_bus(&mut self) -> Result<ConnectionState, GatewayError> {
        self.writer.write_all(GREETING).await?;

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            while let Some(byte) = self.input.pop_front() {
                let Some(frame) = self.assembler.push(byte) else {
                    continue;
                };
                match parse_frame(&frame) {
                    Ok(Command::OpenBus { bus }) => {
                        if self.ctx.registry.contains(&bus) {
                            tracing::info!(peer = %self.peer, bus = %bus, "Bus opened");
                            self.bus = Some(bus);
                            return Ok(ConnectionState::Bridge);
                        }
                        tracing::warn!(peer = %self.peer, bus = %bus, "Open refused, bus not authorized");
                        self.writer.write_all(OPEN_ERROR).await?;
                        return Ok(ConnectionState::Shutdown);
                    }
                    Ok(other) => {
                        tracing::debug!(peer = %self.peer, command = ?other.code(), "Ignored before open");
                    }
                    Err(e) => {
                        tracing::warn!(
                            peer = %self.peer,
                            error = %e,
                            frame = %String::from_utf8_lossy(&frame),
                            "Syntax error"
                        );
                    }
                }
            }

            if !self.fill(&mut chunk).await? {
                return Ok(ConnectionState::Shutdown);
            }
        }
    }

    async fn bridge(&mut self) -> Result<ConnectionState, GatewayError> {
        let endpoint = match self.ctx.endpoints.open() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(peer = %self.peer, error = %e, "Failed to open BCM endpoint");
                return Ok(ConnectionState::Shutdown);
            }
        };
        let mut translator = BcmJobTranslator::new(self.ctx.clone());
        let mut chunk = [0u8; READ_CHUNK];

        // Commands that arrived together with the open request
        self.process_input(&*endpoint, &mut translator);

        loop {
            tokio::select! {
                more = self.fill(&mut chunk) => {
                    if !more? {
                        return Ok(ConnectionState::Shutdown);
                    }
                    self.process_input(&*endpoint, &mut translator);
                }
                delivery = endpoint.recv() => match delivery {
                    Ok(delivery) => self.forward(delivery).await?,
                    Err(e @ (BcmError::Truncated(_) | BcmError::UnknownOpcode(_))) => {
                        tracing::warn!(peer = %self.peer, error = %e, "Malformed BCM message skipped");
                    }
                    Err(e) => {
                        tracing::error!(peer = %self.peer, error = %e, "BCM endpoint failed");
                        return Ok(ConnectionState::Shutdown);
                    }
                },
                _ = std::future::ready(()), if translator.has_pending() => {
                    translator.run_pending(&*endpoint);
                    // Let other connections run between sweep chunks
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn process_input(
        &mut self,
        endpoint: &dyn SchedulingEndpoint,
        translator: &mut BcmJobTranslator,
    ) {
        while let Some(byte) = self.input.pop_front() {
            let Some(frame) = self.assembler.push(byte) else {
                continue;
            };
            match parse_frame(&frame) {
                Ok(cmd) => {
                    tracing::debug!(peer = %self.peer, ?cmd, "Command");
                    translator.submit(endpoint, cmd);
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %self.peer,
                        error = %e,
                        frame = %String::from_utf8_lossy(&frame),
                        "Syntax error"
                    );
                }
            }
        }
    }

    async fn forward(&mut self, delivery: BcmDelivery) -> Result<(), GatewayError> {
        let Some(frame) = delivery.to_inbound() else {
            tracing::trace!(opcode = ?delivery.opcode, "BCM status ignored");
            return Ok(());
        };
        let Some(ifname) = self.ctx.resolver.name_of(delivery.ifindex) else {
            tracing::debug!(ifindex = delivery.ifindex, "Delivery from unknown interface dropped");
            return Ok(());
        };

        match encode_frame(&ifname, &frame) {
            Ok(wire) => {
                tracing::debug!(bus = %ifname, can_id = %format!("{:X}", frame.id), dlc = frame.dlc, "Frame received");
                self.writer.write_all(&wire).await?;
            }
            Err(e) => {
                tracing::warn!(bus = %ifname, error = %e, "Frame not forwarded");
            }
        }
        Ok(())
    }
}
